//! Unit tests for VmError and ErrorKind

use core_types::{ErrorKind, VmError, VmResult};

#[cfg(test)]
mod error_kind_tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_distinguishable() {
        let kinds = [
            ErrorKind::InvalidArgument,
            ErrorKind::NotFound,
            ErrorKind::Fault,
            ErrorKind::ResourceExhausted,
            ErrorKind::DeadlineExceeded,
        ];
        for (i, a) in kinds.iter().enumerate() {
            for (j, b) in kinds.iter().enumerate() {
                assert_eq!(i == j, a == b);
            }
        }
    }

    #[test]
    fn test_error_kind_names() {
        assert_eq!(ErrorKind::ResourceExhausted.as_str(), "resource exhausted");
        assert_eq!(ErrorKind::DeadlineExceeded.as_str(), "deadline exceeded");
    }
}

#[cfg(test)]
mod vm_error_tests {
    use super::*;

    fn fails() -> VmResult<u32> {
        Err(VmError::not_found("export 'missing'"))
    }

    fn propagates() -> VmResult<u32> {
        let value = fails()?;
        Ok(value + 1)
    }

    #[test]
    fn test_constructors_set_kind() {
        assert!(VmError::invalid_argument("x").is(ErrorKind::InvalidArgument));
        assert!(VmError::not_found("x").is(ErrorKind::NotFound));
        assert!(VmError::fault("x").is(ErrorKind::Fault));
        assert!(VmError::resource_exhausted("x").is(ErrorKind::ResourceExhausted));
        assert!(VmError::deadline_exceeded("x").is(ErrorKind::DeadlineExceeded));
    }

    #[test]
    fn test_error_propagates_through_question_mark() {
        let err = propagates().unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.message, "export 'missing'");
    }

    #[test]
    fn test_error_is_std_error() {
        let err: Box<dyn std::error::Error> = Box::new(VmError::fault("boom"));
        assert_eq!(err.to_string(), "fault: boom");
    }

    #[test]
    fn test_error_stack_is_preserved_on_clone() {
        let err = VmError::fault("bad").with_stack(vec!["a.b@0".into(), "a.main@8".into()]);
        let clone = err.clone();
        assert_eq!(clone, err);
        assert_eq!(clone.stack.len(), 2);
    }
}
