//! The bytecode set and its dispatch.
//!
//! ```text
//!   0-15   push receiver variable          16-31   push temporary
//!  32-63   push literal constant           64-95   push literal variable
//!  96-103  pop into receiver variable     104-111  pop into temporary
//! 112-119  push self true false nil -1 0 1 2
//! 120-125  returns                        126-127  unused
//! 128-134  extended push, store, send     135-137  pop, dup, thisContext
//! 138-143  unused                         144-175  jumps
//! 176-191  arithmetic sends               192-207  special sends
//! 208-255  sends of literal 0-15 with 0, 1 or 2 arguments
//! ```
use crate::{
    Interpreter, Value, VmError,
    context::{CALLER, SENDER, TEMP_FRAME_START},
    lookup::ASSOCIATION_VALUE,
    primitives::{
        arithmetic::{exact_div, floor_div, floor_mod, shift},
        declined,
    },
    special::{SELECTOR_MUST_BE_BOOLEAN, SPECIAL_SELECTORS},
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Slot {
    ReceiverVariable(usize),
    Temporary(usize),
    LiteralConstant(usize),
    LiteralVariable(usize),
}

impl Slot {
    /// Operand byte of the extended push and store bytecodes.
    fn extended(operand: u8) -> Self {
        let index = (operand & 63) as usize;
        match operand >> 6 {
            0 => Self::ReceiverVariable(index),
            1 => Self::Temporary(index),
            2 => Self::LiteralConstant(index),
            _ => Self::LiteralVariable(index),
        }
    }
}

impl Interpreter {
    pub(crate) fn dispatch(&mut self, bytecode: u8) -> Result<(), VmError> {
        match bytecode {
            0..=15 => self.push_slot(Slot::ReceiverVariable((bytecode & 15) as usize)),
            16..=31 => self.push_slot(Slot::Temporary((bytecode & 15) as usize)),
            32..=63 => self.push_slot(Slot::LiteralConstant((bytecode & 31) as usize)),
            64..=95 => self.push_slot(Slot::LiteralVariable((bytecode & 31) as usize)),
            96..=103 => {
                let value = self.pop()?;
                self.store_slot(Slot::ReceiverVariable((bytecode & 7) as usize), value)
            }
            104..=111 => {
                let value = self.pop()?;
                self.store_slot(Slot::Temporary((bytecode & 7) as usize), value)
            }
            112 => self.push(self.receiver),
            113 => self.push(self.specials.true_object),
            114 => self.push(self.specials.false_object),
            115 => self.push(self.specials.nil),
            116..=119 => self.push(Value::small(i64::from(bytecode) - 117)),
            120..=124 => {
                let value = match bytecode {
                    120 => self.receiver,
                    121 => self.specials.true_object,
                    122 => self.specials.false_object,
                    123 => self.specials.nil,
                    _ => self.pop()?,
                };
                let target = self.fetch(self.home_context, SENDER)?;
                self.do_return(value, target)
            }
            125 => {
                let value = self.pop()?;
                let target = self.fetch(self.active_context, CALLER)?;
                self.do_return(value, target)
            }
            128 => {
                let operand = self.next_byte()?;
                self.push_slot(Slot::extended(operand))
            }
            129 => {
                let operand = self.next_byte()?;
                let value = self.top()?;
                self.store_slot(Slot::extended(operand), value)
            }
            130 => {
                let operand = self.next_byte()?;
                let value = self.pop()?;
                self.store_slot(Slot::extended(operand), value)
            }
            131 => {
                let operand = self.next_byte()?;
                let selector = self.literal((operand & 31) as usize)?;
                self.send(selector, (operand >> 5) as usize, false)
            }
            132 => self.double_extended(),
            133 => {
                let operand = self.next_byte()?;
                let selector = self.literal((operand & 31) as usize)?;
                self.send(selector, (operand >> 5) as usize, true)
            }
            134 => {
                let operand = self.next_byte()?;
                let selector = self.literal((operand & 63) as usize)?;
                self.send(selector, (operand >> 6) as usize, false)
            }
            135 => self.pop().map(drop),
            136 => self.push(self.top()?),
            137 => {
                // the context escapes, so it can no longer be pooled
                self.reclaimable_contexts = 0;
                self.push(self.active_context)
            }
            144..=151 => self.jump(i64::from(bytecode & 7) + 1),
            152..=159 => self.jump_if(false, i64::from(bytecode & 7) + 1),
            160..=167 => {
                let low = self.next_byte()?;
                let offset = (i64::from(bytecode & 7) - 4) * 256 + i64::from(low);
                self.jump(offset)?;
                if offset < 0 {
                    self.check_for_interrupts()?;
                }
                Ok(())
            }
            168..=175 => {
                let low = self.next_byte()?;
                let offset = i64::from(bytecode & 3) * 256 + i64::from(low);
                self.jump_if(bytecode < 172, offset)
            }
            176..=191 => self.arithmetic((bytecode & 15) as usize),
            192..=207 => self.special_send((bytecode & 15) as usize),
            208..=255 => {
                let selector = self.literal((bytecode & 15) as usize)?;
                let arg_count = (bytecode >> 4) as usize - 13;
                self.send(selector, arg_count, false)
            }
            126 | 127 | 138..=143 => Err(self.bad_bytecode(bytecode)),
        }
    }

    fn bad_bytecode(&self, bytecode: u8) -> VmError {
        VmError::BadBytecode {
            bytecode,
            pc: self.pc.saturating_sub(1),
        }
    }

    fn push_slot(&mut self, slot: Slot) -> Result<(), VmError> {
        let value = match slot {
            Slot::ReceiverVariable(index) => self.fetch(self.receiver, index)?,
            Slot::Temporary(index) => self.fetch(self.home_context, TEMP_FRAME_START + index)?,
            Slot::LiteralConstant(index) => self.literal(index)?,
            Slot::LiteralVariable(index) => self.fetch(self.literal(index)?, ASSOCIATION_VALUE)?,
        };
        self.push(value)
    }

    fn store_slot(&mut self, slot: Slot, value: Value) -> Result<(), VmError> {
        match slot {
            Slot::ReceiverVariable(index) => self.store(self.receiver, index, value),
            Slot::Temporary(index) => self.store(self.home_context, TEMP_FRAME_START + index, value),
            Slot::LiteralConstant(_) => Err(VmError::Malformed {
                what: "store into a literal constant",
                value: self.method,
            }),
            Slot::LiteralVariable(index) => {
                let association = self.literal(index)?;
                self.store(association, ASSOCIATION_VALUE, value)
            }
        }
    }

    /// 132: the operation sits in the top three bits of the first operand,
    /// the literal or variable index in the second.
    fn double_extended(&mut self) -> Result<(), VmError> {
        let first = self.next_byte()?;
        let index = self.next_byte()? as usize;
        let arg_count = (first & 31) as usize;
        match first >> 5 {
            0 => {
                let selector = self.literal(index)?;
                self.send(selector, arg_count, false)
            }
            1 => {
                let selector = self.literal(index)?;
                self.send(selector, arg_count, true)
            }
            2 => self.push_slot(Slot::ReceiverVariable(index)),
            3 => self.push_slot(Slot::LiteralConstant(index)),
            4 => self.push_slot(Slot::LiteralVariable(index)),
            5 => {
                let value = self.top()?;
                self.store_slot(Slot::ReceiverVariable(index), value)
            }
            6 => {
                let value = self.pop()?;
                self.store_slot(Slot::ReceiverVariable(index), value)
            }
            _ => {
                let value = self.top()?;
                self.store_slot(Slot::LiteralVariable(index), value)
            }
        }
    }

    // ── Jumps ─────────────────────────────────────────────────────

    fn jump(&mut self, offset: i64) -> Result<(), VmError> {
        self.pc = usize::try_from(self.pc as i64 + offset).map_err(|_| VmError::Malformed {
            what: "jump target",
            value: self.method,
        })?;
        Ok(())
    }

    /// Pop the condition and jump when it is `condition`. Anything but a
    /// boolean goes back on the stack and is sent mustBeBoolean.
    fn jump_if(&mut self, condition: bool, offset: i64) -> Result<(), VmError> {
        let value = self.pop()?;
        if value == self.specials.boolean(condition) {
            self.jump(offset)
        } else if value == self.specials.boolean(!condition) {
            Ok(())
        } else {
            self.push(value)?;
            let selector = self.special(SELECTOR_MUST_BE_BOOLEAN);
            self.send(selector, 0, false)
        }
    }

    fn peek_byte(&self) -> Option<u8> {
        self.memory
            .get(self.method)
            .and_then(|method| method.bytes())
            .and_then(|bytes| bytes.get(self.pc))
            .copied()
    }

    /// Replace the two operands of a comparison with its result. A
    /// conditional jump that follows consumes the result directly.
    fn push_bool_and_peek(&mut self, result: bool) -> Result<(), VmError> {
        self.pop_n(2)?;
        match self.peek_byte() {
            Some(next @ 152..=159) => {
                self.pc += 1;
                self.stats.bytecodes += 1;
                if !result {
                    self.jump(i64::from(next & 7) + 1)?;
                }
                Ok(())
            }
            Some(next @ 168..=175) => {
                self.pc += 1;
                self.stats.bytecodes += 1;
                let low = self.next_byte()?;
                if result == (next < 172) {
                    self.jump(i64::from(next & 3) * 256 + i64::from(low))?;
                }
                Ok(())
            }
            _ => self.push(self.specials.boolean(result)),
        }
    }

    // ── Special selectors ─────────────────────────────────────────

    /// Entry `index` of the special selectors array, which alternates
    /// selectors and their argument counts.
    pub(crate) fn special_selector(&self, index: usize) -> Result<Value, VmError> {
        self.fetch(self.special(SPECIAL_SELECTORS), index)
    }

    fn send_special(&mut self, index: usize) -> Result<(), VmError> {
        let selector = self.special_selector(index * 2)?;
        let arg_count = self.fetch_int(self.special(SPECIAL_SELECTORS), index * 2 + 1)?;
        let arg_count = usize::try_from(arg_count).map_err(|_| VmError::Malformed {
            what: "special selector argument count",
            value: selector,
        })?;
        self.send(selector, arg_count, false)
    }

    /// + - < > <= >= = ~= * / \\ @ bitShift: // bitAnd: bitOr:, inline for
    /// two SmallIntegers with a SmallInteger answer.
    fn arithmetic(&mut self, index: usize) -> Result<(), VmError> {
        let (Some(receiver), Some(argument)) =
            (self.stack_value(1)?.as_small(), self.stack_value(0)?.as_small())
        else {
            return self.send_special(index);
        };
        let result = match index {
            0 => Some(receiver + argument),
            1 => Some(receiver - argument),
            2 => return self.push_bool_and_peek(receiver < argument),
            3 => return self.push_bool_and_peek(receiver > argument),
            4 => return self.push_bool_and_peek(receiver <= argument),
            5 => return self.push_bool_and_peek(receiver >= argument),
            6 => return self.push_bool_and_peek(receiver == argument),
            7 => return self.push_bool_and_peek(receiver != argument),
            8 => Some(receiver * argument),
            9 => exact_div(receiver, argument),
            10 => floor_mod(receiver, argument),
            11 => {
                let point = self.make_point(Value::small(receiver), Value::small(argument))?;
                return self.pop_then_push(2, point);
            }
            12 => shift(receiver, argument),
            13 => floor_div(receiver, argument),
            14 => Some(receiver & argument),
            _ => Some(receiver | argument),
        };
        match result.and_then(Value::try_small) {
            Some(value) => self.pop_then_push(2, value),
            None => self.send_special(index),
        }
    }

    /// at: at:put: size next nextPut: atEnd == class blockCopy: value value:
    /// do: new new: x y
    fn special_send(&mut self, index: usize) -> Result<(), VmError> {
        let handled = match index {
            0 => self.quick_at()?,
            1 => self.quick_at_put()?,
            2 => self.quick_size()?,
            6 => {
                let identical = self.stack_value(1)? == self.stack_value(0)?;
                self.pop_then_push(2, self.specials.boolean(identical))?;
                true
            }
            7 => {
                let class = self.class_of(self.top()?)?;
                self.pop_then_push(1, class)?;
                true
            }
            8 => match declined(self.block_copy())? {
                Some(block) => {
                    self.pop_then_push(2, block)?;
                    true
                }
                None => false,
            },
            9 => declined(self.block_value(0))?.is_some(),
            10 => declined(self.block_value(1))?.is_some(),
            _ => false,
        };
        if handled {
            return Ok(());
        }
        self.send_special(index + 16)
    }
}
