//! Display, raster, keyboard and mouse primitives. Forms are copied out of
//! the heap into [`Form`] values before a collaborator sees them.
use crate::{
    Interpreter, PrimitiveError, PrimitiveResult, Value, VmError,
    devices::{Blit, Display as _, Form, Keyboard as _, Mouse as _, Raster as _, Rect},
    primitives::{OrFail, POINT_X, POINT_Y},
    special::{CLASS_POINT, THE_DISPLAY},
};

pub const FORM_BITS: usize = 0;
pub const FORM_WIDTH: usize = 1;
pub const FORM_HEIGHT: usize = 2;
pub const FORM_DEPTH: usize = 3;
pub const FORM_OFFSET: usize = 4;

pub const BITBLT_DEST: usize = 0;
pub const BITBLT_SOURCE: usize = 1;
pub const BITBLT_HALFTONE: usize = 2;
pub const BITBLT_RULE: usize = 3;
pub const BITBLT_DEST_X: usize = 4;
pub const BITBLT_SOURCE_X: usize = 8;
pub const BITBLT_CLIP_X: usize = 10;
pub const BITBLT_COLOR_MAP: usize = 14;

/// Rules that answer a pixel count instead of the receiver.
const COUNTING_RULES: [i32; 2] = [22, 32];

impl Interpreter {
    fn load_form(&self, form: Value) -> Result<Form, PrimitiveError> {
        let object = self.memory.get(form).or_fail()?;
        if object.pointers.len() <= FORM_DEPTH {
            return Err(PrimitiveError::Failed);
        }
        let field = |index: usize| -> Result<i32, PrimitiveError> {
            let value = object.pointers[index].as_small().or_fail()?;
            i32::try_from(value).or_fail()
        };
        let (width, height, depth) = (field(FORM_WIDTH)?, field(FORM_HEIGHT)?, field(FORM_DEPTH)?);
        if width < 0 || height < 0 {
            return Err(PrimitiveError::Failed);
        }
        let bits = self.words_of(object.pointers[FORM_BITS]).or_fail()?;
        Ok(Form {
            bits,
            width,
            height,
            depth: depth.abs(),
        })
    }

    fn words_of(&self, value: Value) -> Option<Vec<u32>> {
        self.memory.get(value)?.words().map(<[u32]>::to_vec)
    }

    fn store_form_bits(&mut self, form: Value, bits: &[u32]) -> Result<(), VmError> {
        let bitmap = self.fetch(form, FORM_BITS)?;
        let words = self
            .memory
            .object_mut(bitmap)?
            .words_mut()
            .ok_or(VmError::Malformed {
                what: "form bitmap",
                value: bitmap,
            })?;
        let len = words.len().min(bits.len());
        words[..len].copy_from_slice(&bits[..len]);
        Ok(())
    }

    /// A coordinate field: a SmallInteger, a Float truncated, or `default`
    /// for nil.
    fn coordinate(&self, value: Value, default: i32) -> Result<i32, PrimitiveError> {
        if value == self.specials.nil {
            return Ok(default);
        }
        if let Some(small) = value.as_small() {
            return i32::try_from(small).or_fail();
        }
        let float = self.float_value(value).or_fail()?;
        if !(f64::from(i32::MIN)..=f64::from(i32::MAX)).contains(&float) {
            return Err(PrimitiveError::Failed);
        }
        Ok(float as i32)
    }

    fn rect_at(&self, fields: &[Value], start: usize, default: Rect) -> Result<Rect, PrimitiveError> {
        let field = |offset: usize| fields.get(start + offset).copied().or_fail();
        Ok(Rect {
            x: self.coordinate(field(0)?, default.x)?,
            y: self.coordinate(field(1)?, default.y)?,
            width: self.coordinate(field(2)?, default.width)?,
            height: self.coordinate(field(3)?, default.height)?,
        })
    }

    /// Halftones are either a Form or a bare word array.
    fn halftone(&self, value: Value) -> Result<Option<Vec<u32>>, PrimitiveError> {
        if value == self.specials.nil {
            return Ok(None);
        }
        if let Some(words) = self.words_of(value) {
            return Ok(Some(words));
        }
        Ok(Some(self.load_form(value)?.bits))
    }

    /// Resolve every field of a BitBlt into a [`Blit`], clipped to the
    /// destination. `alpha` is the extra argument of the blending rules.
    fn load_blit(&self, bitblt: Value, alpha: Option<i64>) -> Result<Blit, PrimitiveError> {
        let fields = self.memory.get(bitblt).or_fail()?.pointers.clone();
        if fields.len() <= BITBLT_CLIP_X + 3 {
            return Err(PrimitiveError::Failed);
        }
        let rule = i32::try_from(fields[BITBLT_RULE].as_small().or_fail()?).or_fail()?;
        if !(0..=39).contains(&rule) || rule == 16 || rule == 17 {
            return Err(PrimitiveError::Failed);
        }
        let nil = self.specials.nil;
        let dest = self.load_form(fields[BITBLT_DEST])?;
        let source = match fields[BITBLT_SOURCE] {
            source if source == nil => None,
            source => Some(self.load_form(source)?),
        };
        let halftone = self.halftone(fields[BITBLT_HALFTONE])?;
        let dest_rect = self.rect_at(&fields, BITBLT_DEST_X, Rect::default())?;
        let (source_x, source_y) = if source.is_some() {
            (
                self.coordinate(fields[BITBLT_SOURCE_X], 0)?,
                self.coordinate(fields[BITBLT_SOURCE_X + 1], 0)?,
            )
        } else {
            (0, 0)
        };
        let whole = Rect {
            x: 0,
            y: 0,
            width: dest.width,
            height: dest.height,
        };
        let clip = clip_to(self.rect_at(&fields, BITBLT_CLIP_X, whole)?, whole);
        let color_map = match fields.get(BITBLT_COLOR_MAP) {
            Some(&map) if map != nil => Some(self.words_of(map).or_fail()?),
            _ => None,
        };
        let alpha = match (rule, alpha) {
            (30 | 31, Some(alpha)) if (0..=255).contains(&alpha) => Some(alpha as i32),
            (30 | 31, _) => return Err(PrimitiveError::Failed),
            _ => None,
        };
        Ok(Blit {
            dest,
            source,
            halftone,
            rule,
            dest_rect,
            source_x,
            source_y,
            clip,
            color_map,
            alpha,
            bit_count: 0,
        })
    }
}

fn clip_to(rect: Rect, bounds: Rect) -> Rect {
    let x = rect.x.max(bounds.x);
    let y = rect.y.max(bounds.y);
    let right = (rect.x + rect.width).min(bounds.x + bounds.width);
    let bottom = (rect.y + rect.height).min(bounds.y + bounds.height);
    Rect {
        x,
        y,
        width: (right - x).max(0),
        height: (bottom - y).max(0),
    }
}

fn small_point(vm: &mut Interpreter, (x, y): (i32, i32)) -> Result<Value, VmError> {
    vm.make_point(Value::small(i64::from(x)), Value::small(i64::from(y)))
}

pub fn mouse_point(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let position = vm.devices.mouse.point();
    let point = small_point(vm, position)?;
    vm.answer(0, point)
}

/// BitBlt copyBits, with an optional alpha argument.
pub fn copy_bits(vm: &mut Interpreter, arg_count: usize) -> PrimitiveResult {
    if arg_count > 1 {
        return Err(PrimitiveError::Failed);
    }
    let bitblt = vm.stack_object(arg_count)?;
    let alpha = match arg_count {
        1 => Some(vm.stack_integer(0)?),
        _ => None,
    };
    let mut blit = vm.load_blit(bitblt, alpha)?;
    let affected = match vm.devices.raster.copy_bits(&mut blit) {
        Ok(affected) => affected,
        Err(err) => {
            log::warn!("copyBits failed: {err}");
            return Err(PrimitiveError::Failed);
        }
    };
    let dest = vm.fetch(bitblt, BITBLT_DEST)?;
    vm.store_form_bits(dest, &blit.dest.bits)?;
    if let Some(area) = affected {
        if dest == vm.special(THE_DISPLAY) {
            vm.devices.display.show(&blit.dest, area);
        }
    }
    vm.pop_n(arg_count)?;
    if COUNTING_RULES.contains(&blit.rule) {
        vm.answer(0, Value::small(i64::from(blit.bit_count)))?;
    }
    Ok(())
}

/// Cursor beCursor, optionally with a mask form that is ignored.
pub fn be_cursor(vm: &mut Interpreter, arg_count: usize) -> PrimitiveResult {
    if arg_count > 1 {
        return Err(PrimitiveError::Failed);
    }
    let cursor = vm.stack_object(arg_count)?;
    let form = vm.load_form(cursor)?;
    let offset = vm.fetch(cursor, FORM_OFFSET).or(Err(PrimitiveError::Failed))?;
    if !vm.is_instance_of(offset, CLASS_POINT) {
        return Err(PrimitiveError::Failed);
    }
    let x = i32::try_from(vm.fetch(offset, POINT_X)?.as_small().or_fail()?).or_fail()?;
    let y = i32::try_from(vm.fetch(offset, POINT_Y)?.as_small().or_fail()?).or_fail()?;
    vm.devices.display.set_cursor(&form, (x, y));
    vm.pop_n(arg_count)?;
    Ok(())
}

pub fn be_display(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let display = vm.stack_object(0)?;
    let form = vm.load_form(display)?;
    if let Err(err) = vm.devices.display.set_display(&form) {
        log::warn!("cannot use display form: {err}");
        return Err(PrimitiveError::Failed);
    }
    vm.store(vm.specials.array, THE_DISPLAY, display)?;
    Ok(())
}

pub fn screen_size(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let extent = vm.devices.display.screen_size();
    let point = small_point(vm, extent)?;
    vm.answer(0, point)
}

pub fn mouse_buttons(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let buttons = Value::small(i64::from(vm.devices.mouse.buttons()));
    vm.answer(0, buttons)
}

pub fn keyboard_next(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let key = vm
        .devices
        .keyboard
        .next()
        .map_or(vm.specials.nil, |key| Value::small(i64::from(key)));
    vm.answer(0, key)
}

pub fn keyboard_peek(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let key = vm
        .devices
        .keyboard
        .peek()
        .map_or(vm.specials.nil, |key| Value::small(i64::from(key)));
    vm.answer(0, key)
}

pub fn reverse_display(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    vm.devices.display.reverse();
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::{
        HeapObject,
        devices::{KeyboardQueue, Raster},
        testing::World,
    };

    /// Sets every destination word and counts the clipped pixels.
    struct Fill;

    impl Raster for Fill {
        fn copy_bits(&mut self, blit: &mut Blit) -> io::Result<Option<Rect>> {
            blit.dest.bits.fill(0xFFFF_FFFF);
            blit.bit_count = blit.clip.width * blit.clip.height;
            Ok(Some(blit.clip))
        }
    }

    fn world_with_stack(values: &[Value]) -> World {
        let mut world = World::new();
        let driver = world.method(&[], &[112]);
        world.activate(driver, world.vm.specials.nil);
        for &value in values {
            world.vm.push(value).unwrap();
        }
        world
    }

    fn form(world: &mut World, width: i64, height: i64) -> (Value, Value) {
        let form_class = world.define_class("Form", world.object_class, 5);
        let bitmap_class = world.object_class;
        let bitmap = world
            .vm
            .allocate(HeapObject::with_words(bitmap_class, vec![0; (width * height) as usize]))
            .unwrap();
        let nil = world.vm.specials.nil;
        let form = world.instance(
            form_class,
            &[bitmap, Value::small(width), Value::small(height), Value::small(1), nil],
        );
        (form, bitmap)
    }

    fn bitblt(world: &mut World, dest: Value, rule: i64) -> Value {
        let class = world.define_class("BitBlt", world.object_class, 15);
        let nil = world.vm.specials.nil;
        let mut fields = vec![nil; 15];
        fields[BITBLT_DEST] = dest;
        fields[BITBLT_RULE] = Value::small(rule);
        for (offset, value) in [0, 0, 2, 2].into_iter().enumerate() {
            fields[BITBLT_DEST_X + offset] = Value::small(value);
        }
        // a clip wider than the destination
        for (offset, value) in [-4, 0, 100, 100].into_iter().enumerate() {
            fields[BITBLT_CLIP_X + offset] = Value::small(value);
        }
        world.instance(class, &fields)
    }

    #[test]
    fn copy_bits_writes_the_destination_back() {
        let mut world = world_with_stack(&[]);
        world.vm.devices.raster = Box::new(Fill);
        let (dest, bitmap) = form(&mut world, 4, 2);
        let blt = bitblt(&mut world, dest, 3);
        world.vm.push(blt).unwrap();
        copy_bits(&mut world.vm, 0).unwrap();
        assert_eq!(world.vm.top().unwrap(), blt);
        let words = world.vm.memory.object(bitmap).unwrap().words().unwrap().to_vec();
        assert!(words.iter().all(|&word| word == 0xFFFF_FFFF));
    }

    #[test]
    fn counting_rules_answer_the_clipped_pixel_count() {
        let mut world = world_with_stack(&[]);
        world.vm.devices.raster = Box::new(Fill);
        let (dest, _) = form(&mut world, 4, 2);
        let blt = bitblt(&mut world, dest, 32);
        world.vm.push(blt).unwrap();
        copy_bits(&mut world.vm, 0).unwrap();
        assert_eq!(world.vm.top().unwrap(), Value::small(8));
    }

    #[test]
    fn blending_rules_need_an_alpha_argument() {
        let mut world = world_with_stack(&[]);
        let (dest, _) = form(&mut world, 4, 2);
        let blt = bitblt(&mut world, dest, 30);
        world.vm.push(blt).unwrap();
        assert!(matches!(copy_bits(&mut world.vm, 0), Err(PrimitiveError::Failed)));
        world.vm.push(Value::small(300)).unwrap();
        assert!(matches!(copy_bits(&mut world.vm, 1), Err(PrimitiveError::Failed)));
        world.vm.pop().unwrap();
        world.vm.push(Value::small(128)).unwrap();
        copy_bits(&mut world.vm, 1).unwrap();
        assert_eq!(world.vm.top().unwrap(), blt);
    }

    #[test]
    fn be_display_registers_the_form() {
        let mut world = world_with_stack(&[]);
        let (display, _) = form(&mut world, 32, 16);
        world.vm.push(display).unwrap();
        be_display(&mut world.vm, 0).unwrap();
        assert_eq!(world.vm.special(THE_DISPLAY), display);
        world.vm.push(Value::small(0)).unwrap();
        screen_size(&mut world.vm, 0).unwrap();
        let size = world.vm.top().unwrap();
        assert_eq!(world.vm.fetch(size, POINT_X).unwrap(), Value::small(32));
        assert_eq!(world.vm.fetch(size, POINT_Y).unwrap(), Value::small(16));
    }

    #[test]
    fn keyboard_primitives_answer_nil_when_empty() {
        let mut world = world_with_stack(&[Value::small(0)]);
        let keys = KeyboardQueue::new(world.vm.devices.events.clone());
        world.vm.devices.keyboard = Box::new(keys.clone());
        keyboard_peek(&mut world.vm, 0).unwrap();
        assert_eq!(world.vm.top().unwrap(), world.vm.specials.nil);
        keys.push(97);
        keyboard_peek(&mut world.vm, 0).unwrap();
        assert_eq!(world.vm.top().unwrap(), Value::small(97));
        keyboard_next(&mut world.vm, 0).unwrap();
        assert_eq!(world.vm.top().unwrap(), Value::small(97));
        keyboard_next(&mut world.vm, 0).unwrap();
        assert_eq!(world.vm.top().unwrap(), world.vm.specials.nil);
    }

    #[test]
    fn clipping_stays_inside_the_bounds() {
        let bounds = Rect {
            x: 0,
            y: 0,
            width: 10,
            height: 5,
        };
        let clipped = clip_to(
            Rect {
                x: -3,
                y: 2,
                width: 20,
                height: 20,
            },
            bounds,
        );
        assert_eq!(
            clipped,
            Rect {
                x: 0,
                y: 2,
                width: 10,
                height: 3
            }
        );
    }
}
