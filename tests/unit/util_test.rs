//! Tests for utility functions

use agent_taskmgr::util::{init_tracing, now_ms, ItemKey, ItemKeyError};

#[test]
fn test_item_key_with_params() {
    let key: ItemKey = "vfs.fs.size[/,free]".parse().unwrap();
    assert_eq!(key.name(), "vfs.fs.size");
    assert_eq!(key.params(), ["/", "free"]);
    assert_eq!(key.to_string(), "vfs.fs.size[/,free]");
}

#[test]
fn test_item_key_quoted_and_array_params() {
    let key = ItemKey::parse(r#"log.count["a,b",[x,y], z]"#).unwrap();
    assert_eq!(key.params(), ["a,b", "[x,y]", "z"]);
}

#[test]
fn test_item_key_errors() {
    assert_eq!(ItemKey::parse(""), Err(ItemKeyError::Empty));
    assert_eq!(ItemKey::parse("[x]"), Err(ItemKeyError::Empty));
    assert!(matches!(
        ItemKey::parse("vfs fs"),
        Err(ItemKeyError::InvalidCharacter { position: 3, character: ' ' })
    ));
    assert_eq!(ItemKey::parse("vfs.fs.size[/"), Err(ItemKeyError::Unterminated));
    assert!(matches!(
        ItemKey::parse("vfs.fs.size[/]x"),
        Err(ItemKeyError::TrailingData { .. })
    ));
}

#[test]
fn test_now_ms_is_after_epoch() {
    assert!(now_ms() > 1_600_000_000_000);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing("agent_taskmgr=debug");
    init_tracing("info");
    tracing::info!("subscriber installed");
}
