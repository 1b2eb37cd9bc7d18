//! Unit tests for ThrownError and ErrorKind

use core_types::{ErrorKind, ThrownError};

#[cfg(test)]
mod error_kind_tests {
    use super::*;

    #[test]
    fn test_builtin_names_parse_to_variants() {
        assert_eq!("TypeError".parse::<ErrorKind>().unwrap(), ErrorKind::TypeError);
        assert_eq!("SyntaxError".parse::<ErrorKind>().unwrap(), ErrorKind::SyntaxError);
        assert_eq!("URIError".parse::<ErrorKind>().unwrap(), ErrorKind::URIError);
        assert_eq!("Error".parse::<ErrorKind>().unwrap(), ErrorKind::Error);
    }

    #[test]
    fn test_kind_names_are_case_sensitive() {
        assert_eq!(
            "typeerror".parse::<ErrorKind>().unwrap(),
            ErrorKind::Other("typeerror".to_string())
        );
    }

    #[test]
    fn test_display_matches_constructor_name() {
        assert_eq!(ErrorKind::RangeError.to_string(), "RangeError");
        assert_eq!(ErrorKind::Other("Foo".into()).to_string(), "Foo");
    }
}

#[cfg(test)]
mod thrown_error_tests {
    use super::*;

    #[test]
    fn test_parse_bare_error_line() {
        let error = ThrownError::parse_line("TypeError: too many arguments").unwrap();
        assert_eq!(error.kind, ErrorKind::TypeError);
        assert_eq!(error.message, "too many arguments");
    }

    #[test]
    fn test_parse_keeps_colons_in_message() {
        let error = ThrownError::parse_line("SyntaxError: expected: ')'").unwrap();
        assert_eq!(error.kind, ErrorKind::SyntaxError);
        assert_eq!(error.message, "expected: ')'");
    }

    #[test]
    fn test_parse_namespaced_kind() {
        let error =
            ThrownError::parse_line("uncaught exception: WebAssembly.RuntimeError: unreachable")
                .unwrap();
        assert_eq!(error.kind.as_str(), "WebAssembly.RuntimeError");
    }

    #[test]
    fn test_overrecursion_detection() {
        let error = ThrownError::new(ErrorKind::InternalError, "too much recursion");
        assert!(error.is_overrecursed());
        assert!(!error.is_out_of_memory());
    }

    #[test]
    fn test_json_round_trip() {
        let error = ThrownError::new(ErrorKind::InternalError, "out of memory");
        let json = serde_json::to_string(&error).unwrap();
        let back: ThrownError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, error);
    }
}
