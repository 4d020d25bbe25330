use peridot::codec::Value;
use peridot::SessionState;

#[test]
fn default_state_is_default() {
    let state = SessionState::new();
    assert!(state.is_default());
    assert_eq!(state.module(), None);
}

#[test]
fn with_module_copies_instead_of_mutating() {
    let parent = SessionState::new();
    let child = parent.with_module("test_module");

    assert_eq!(child.module(), Some("test_module"));
    assert_eq!(parent.module(), None);
    assert!(parent.is_default());
    assert!(!child.is_default());
}

#[test]
fn derivations_compose_without_cross_talk() {
    let base = SessionState::new();
    let configured = base.with_config([("allow_bare_ddl", Value::Str("AlwaysAllow".into()))]);
    let scoped = configured.with_module("test_module");

    // The module landed only on the final derivation.
    assert_eq!(scoped.module(), Some("test_module"));
    assert_eq!(configured.module(), None);
    // The config travelled through.
    assert!(scoped.config().contains_key("allow_bare_ddl"));
    assert!(base.config().is_empty());
}

#[test]
fn with_aliases_extends_the_map() {
    let state = SessionState::new()
        .with_aliases([("m", "module_one")])
        .with_aliases([("n", "module_two")]);
    assert_eq!(state.aliases().len(), 2);
    assert_eq!(state.aliases()["m"], "module_one");
    assert_eq!(state.aliases()["n"], "module_two");
}

#[test]
fn with_globals_overwrites_by_qualified_name() {
    let state = SessionState::new()
        .with_globals([("default::current_user", Value::Str("alice".into()))])
        .with_globals([("default::current_user", Value::Str("bob".into()))]);
    assert_eq!(
        state.globals()["default::current_user"],
        Value::Str("bob".into())
    );
}

#[test]
fn without_module_returns_to_server_default() {
    let state = SessionState::new().with_module("m").without_module();
    assert_eq!(state.module(), None);
}

#[test]
fn derived_states_never_share_storage() {
    let parent = SessionState::new().with_aliases([("a", "one")]);
    let child = parent.with_aliases([("b", "two")]);

    assert_eq!(parent.aliases().len(), 1);
    assert_eq!(child.aliases().len(), 2);
    assert!(!parent.aliases().contains_key("b"));
}
