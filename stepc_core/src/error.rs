//! Compile-time rejections with stable error codes.

use thiserror::Error;

/// The error type for every compile-time rejection.
///
/// Each variant corresponds to one stable error code (see [`CompileError::code`]).
/// The compiler fails fast on the first error in the current expression and
/// does not partial-emit; the attached string is the interned source text of
/// the offending node, standing in for a span.
#[derive(Debug, Clone, Error)]
pub enum CompileError {
    /// Syntax the compiler does not translate (regex, bitwise, optional
    /// chaining, switch, generators, ...).
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
    /// Input that is well-formed ECMAScript but invalid for this compiler
    /// (unknown identifier, elided array item, break outside a loop, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// An internal invariant was broken while assembling the state graph.
    #[error("unexpected error: {0}")]
    Unexpected(String),
    /// `class`, `new` (outside `throw new Error`), `this`, `super`.
    #[error("classes are not supported: {0}")]
    ClassesNotSupported(String),
    /// `throw` of anything but `new Error(..)`, `Error(..)` or
    /// `new StepFunctionError(name, cause)`.
    #[error("throw must be an Error or StepFunctionError: {0}")]
    ThrowMustBeError(String),
    /// `undefined` cannot round-trip through JSON.
    #[error("Step Functions does not support undefined: {0}")]
    UndefinedNotSupported(String),
    /// Computed property names must constant-fold to a string.
    #[error("property names must be constant: {0}")]
    PropertyNamesMustBeConstant(String),
    /// Element access that can never resolve (negative or fractional index,
    /// non-string non-number key).
    #[error("invalid collection access: {0}")]
    InvalidCollectionAccess(String),
    /// `*`, `/`, `%`, `**` and all bitwise operators on non-constant
    /// operands: ASL has no intrinsic for them.
    #[error("cannot perform arithmetic or bitwise computations on variables: {0}")]
    ArithmeticOnVariables(String),
}

impl CompileError {
    /// The stable error code of this rejection.
    ///
    /// Codes are part of the external interface and never change, even when
    /// messages are reworded.
    pub fn code(&self) -> &'static str {
        match self {
            CompileError::UnsupportedFeature(_) => "Unsupported_Feature",
            CompileError::InvalidInput(_) => "Invalid_Input",
            CompileError::Unexpected(_) => "Unexpected_Error",
            CompileError::ClassesNotSupported(_) => "Classes_are_not_supported",
            CompileError::ThrowMustBeError(_) => {
                "StepFunction_Throw_must_be_Error_or_StepFunctionError_class"
            }
            CompileError::UndefinedNotSupported(_) => {
                "Step_Functions_does_not_support_undefined"
            }
            CompileError::PropertyNamesMustBeConstant(_) => {
                "StepFunctions_property_names_must_be_constant"
            }
            CompileError::InvalidCollectionAccess(_) => {
                "StepFunctions_Invalid_collection_access"
            }
            CompileError::ArithmeticOnVariables(_) => {
                "Cannot_perform_all_arithmetic_or_bitwise_computations_on_variables_in_Step_Function"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            CompileError::UnsupportedFeature(String::new()).code(),
            "Unsupported_Feature"
        );
        assert_eq!(
            CompileError::ArithmeticOnVariables(String::new()).code(),
            "Cannot_perform_all_arithmetic_or_bitwise_computations_on_variables_in_Step_Function"
        );
        assert_eq!(
            CompileError::ThrowMustBeError(String::new()).code(),
            "StepFunction_Throw_must_be_Error_or_StepFunctionError_class"
        );
    }
}
