use crate::{Interpreter, PrimitiveResult, Value, primitives::OrFail};

// Integer kernels shared with the arithmetic bytecodes. `None` means the
// operation has no SmallInteger answer and the full send must run.

pub(crate) fn floor_div(a: i64, b: i64) -> Option<i64> {
    if b == 0 {
        return None;
    }
    let quotient = a / b;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Some(quotient - 1)
    } else {
        Some(quotient)
    }
}

pub(crate) fn floor_mod(a: i64, b: i64) -> Option<i64> {
    floor_div(a, b).map(|q| a - q * b)
}

/// Only exact quotients; anything else is a Fraction.
pub(crate) fn exact_div(a: i64, b: i64) -> Option<i64> {
    (b != 0 && a % b == 0).then(|| a / b)
}

pub(crate) fn truncated_div(a: i64, b: i64) -> Option<i64> {
    (b != 0).then(|| a / b)
}

pub(crate) fn shift(a: i64, count: i64) -> Option<i64> {
    if count < 0 {
        return Some(a >> (-count).min(63));
    }
    if count >= 63 {
        return (a == 0).then_some(0);
    }
    let shifted = a << count;
    (shifted >> count == a).then_some(shifted)
}

fn integer_op(vm: &mut Interpreter, op: fn(i64, i64) -> Option<i64>) -> PrimitiveResult {
    let receiver = vm.stack_integer(1)?;
    let argument = vm.stack_integer(0)?;
    let result = op(receiver, argument).and_then(Value::try_small).or_fail()?;
    vm.answer(1, result)
}

fn compare(vm: &mut Interpreter, op: fn(i64, i64) -> bool) -> PrimitiveResult {
    let receiver = vm.stack_integer(1)?;
    let argument = vm.stack_integer(0)?;
    vm.answer_bool(1, op(receiver, argument))
}

fn bit_op(vm: &mut Interpreter, op: fn(u32, u32) -> u32) -> PrimitiveResult {
    let receiver = vm.stack_pos32(1)?;
    let argument = vm.stack_pos32(0)?;
    let result = vm.pos32_for(op(receiver, argument))?;
    vm.answer(1, result)
}

pub fn add(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    integer_op(vm, |a, b| Some(a + b))
}

pub fn subtract(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    integer_op(vm, |a, b| Some(a - b))
}

pub fn multiply(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    integer_op(vm, |a, b| a.checked_mul(b))
}

pub fn divide(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    integer_op(vm, exact_div)
}

pub fn modulo(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    integer_op(vm, floor_mod)
}

pub fn floor_divide(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    integer_op(vm, floor_div)
}

pub fn quotient(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    integer_op(vm, truncated_div)
}

pub fn less(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    compare(vm, |a, b| a < b)
}

pub fn greater(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    compare(vm, |a, b| a > b)
}

pub fn less_or_equal(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    compare(vm, |a, b| a <= b)
}

pub fn greater_or_equal(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    compare(vm, |a, b| a >= b)
}

pub fn equal(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    compare(vm, |a, b| a == b)
}

pub fn not_equal(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    compare(vm, |a, b| a != b)
}

pub fn bit_and(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    bit_op(vm, |a, b| a & b)
}

pub fn bit_or(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    bit_op(vm, |a, b| a | b)
}

pub fn bit_xor(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    bit_op(vm, |a, b| a ^ b)
}

/// Shift within 32 unsigned bits; losing set bits to the left fails.
pub fn bit_shift(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let receiver = vm.stack_pos32(1)?;
    let count = vm.stack_integer(0)?;
    let shifted = if count < 0 {
        u64::from(receiver) >> (-count).min(63)
    } else if count >= 32 {
        if receiver != 0 {
            return Err(crate::PrimitiveError::Failed);
        }
        0
    } else {
        u64::from(receiver) << count
    };
    let shifted = u32::try_from(shifted).or_fail()?;
    let result = vm.pos32_for(shifted)?;
    vm.answer(1, result)
}

pub fn make_point(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let x = vm.stack_value(1)?;
    let y = vm.stack_value(0)?;
    let point = vm.make_point(x, y)?;
    vm.answer(1, point)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PrimitiveError, primitives::{POINT_X, POINT_Y}, testing::World};

    fn world_with_stack(values: &[Value]) -> World {
        let mut world = World::new();
        let driver = world.method(&[], &[112]);
        world.activate(driver, world.vm.specials.nil);
        for &value in values {
            world.vm.push(value).unwrap();
        }
        world
    }

    #[test]
    fn floor_division_rounds_toward_negative_infinity() {
        assert_eq!(floor_div(7, 2), Some(3));
        assert_eq!(floor_div(-7, 2), Some(-4));
        assert_eq!(floor_div(7, -2), Some(-4));
        assert_eq!(floor_div(-8, 2), Some(-4));
        assert_eq!(floor_mod(-7, 2), Some(1));
        assert_eq!(floor_mod(7, -2), Some(-1));
        assert_eq!(floor_div(1, 0), None);
        assert_eq!(truncated_div(-7, 2), Some(-3));
        assert_eq!(exact_div(6, 3), Some(2));
        assert_eq!(exact_div(7, 3), None);
    }

    #[test]
    fn shift_refuses_to_lose_bits() {
        assert_eq!(shift(1, 4), Some(16));
        assert_eq!(shift(-16, -2), Some(-4));
        assert_eq!(shift(3, -100), Some(0));
        assert_eq!(shift(1, 63), None);
        assert_eq!(shift(0, 80), Some(0));
        assert_eq!(shift(0x4000_0000_0000_0000, 1), None);
    }

    #[test]
    fn overflowing_add_fails_and_keeps_the_stack() {
        let mut world = world_with_stack(&[Value::small(crate::SMALL_INT_MAX), Value::small(1)]);
        let depth = world.vm.stack_depth();
        assert!(matches!(add(&mut world.vm, 1), Err(PrimitiveError::Failed)));
        assert_eq!(world.vm.stack_depth(), depth);
        assert_eq!(world.vm.top().unwrap(), Value::small(1));
    }

    #[test]
    fn comparison_answers_a_boolean() {
        let mut world = world_with_stack(&[Value::small(3), Value::small(4)]);
        less(&mut world.vm, 1).unwrap();
        assert_eq!(world.vm.top().unwrap(), world.vm.specials.true_object);
    }

    #[test]
    fn bit_ops_widen_to_large_positive_integers() {
        let mut world = world_with_stack(&[Value::small(1), Value::small(31)]);
        bit_shift(&mut world.vm, 1).unwrap();
        let result = world.vm.top().unwrap();
        assert!(!result.is_small());
        assert_eq!(world.vm.pos32_value(result).unwrap(), 1 << 31);

        let mut world = world_with_stack(&[Value::small(2), Value::small(32)]);
        assert!(bit_shift(&mut world.vm, 1).is_err());
    }

    #[test]
    fn make_point_stores_both_coordinates() {
        let mut world = world_with_stack(&[Value::small(3), Value::small(4)]);
        make_point(&mut world.vm, 1).unwrap();
        let point = world.vm.top().unwrap();
        assert_eq!(world.vm.fetch(point, POINT_X).unwrap(), Value::small(3));
        assert_eq!(world.vm.fetch(point, POINT_Y).unwrap(), Value::small(4));
    }
}
