use crate::{Interpreter, PrimitiveError, PrimitiveResult, SMALL_INT_MAX, SMALL_INT_MIN, Value};

fn float_op(vm: &mut Interpreter, op: fn(f64, f64) -> Option<f64>) -> PrimitiveResult {
    let receiver = vm.stack_float(1)?;
    let argument = vm.stack_float(0)?;
    let result = op(receiver, argument).ok_or(PrimitiveError::Failed)?;
    let result = vm.make_float(result)?;
    vm.answer(1, result)
}

fn compare(vm: &mut Interpreter, op: fn(f64, f64) -> bool) -> PrimitiveResult {
    let receiver = vm.stack_float(1)?;
    let argument = vm.stack_float(0)?;
    vm.answer_bool(1, op(receiver, argument))
}

pub fn as_float(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let receiver = vm.stack_integer(0)?;
    let result = vm.make_float(receiver as f64)?;
    vm.answer(0, result)
}

pub fn add(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    float_op(vm, |a, b| Some(a + b))
}

pub fn subtract(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    float_op(vm, |a, b| Some(a - b))
}

pub fn multiply(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    float_op(vm, |a, b| Some(a * b))
}

pub fn divide(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    float_op(vm, |a, b| (b != 0.0).then(|| a / b))
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

pub fn truncated(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let receiver = vm.stack_float(0)?;
    if !(SMALL_INT_MIN as f64..=SMALL_INT_MAX as f64).contains(&receiver) {
        return Err(PrimitiveError::Failed);
    }
    vm.answer(0, Value::small(receiver.trunc() as i64))
}

pub fn ln(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let receiver = vm.stack_float(0)?;
    let result = vm.make_float(receiver.ln())?;
    vm.answer(0, result)
}
