//! Consumes the crate's re-exported types from an external crate, the way a
//! wrapper around the library would.

use chctl::{Error, Result, ServerVersion};

#[test]
fn error_aliases_are_usable_from_outside() {
    fn parse(raw: &str) -> Result<ServerVersion> {
        ServerVersion::parse(raw)
    }
    let version = parse("23.8.1.2").unwrap();
    assert_eq!(version.year, 23);

    let err: Error = parse("nope").unwrap_err();
    assert!(err.to_string().contains("nope"));
}
