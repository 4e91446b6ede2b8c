//! Unit tests for scope derivation.

use std::path::PathBuf;

use serial_test::serial;

use canvas_spawn::pane::{compute_scope, ScopeContext};

fn context(session: Option<&str>, pane: Option<&str>, cwd: &str) -> ScopeContext {
    ScopeContext {
        session: session.map(str::to_owned),
        pane: pane.map(str::to_owned),
        cwd: PathBuf::from(cwd),
    }
}

#[test]
fn identical_contexts_share_a_scope() {
    let a = context(Some("/tmp/tmux-1000/default,1234,0"), Some("%1"), "/work");
    let b = context(Some("/tmp/tmux-1000/default,1234,0"), Some("%1"), "/work");
    assert_eq!(compute_scope(&a), compute_scope(&b));
}

#[test]
fn scope_is_sixteen_lowercase_hex_chars() {
    let scope = compute_scope(&context(None, None, "/"));
    assert_eq!(scope.len(), 16);
    assert!(scope.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[test]
fn each_component_changes_the_scope() {
    let base = context(Some("sess"), Some("%1"), "/work");
    let scope = compute_scope(&base);

    assert_ne!(scope, compute_scope(&context(Some("other"), Some("%1"), "/work")));
    assert_ne!(scope, compute_scope(&context(Some("sess"), Some("%2"), "/work")));
    assert_ne!(scope, compute_scope(&context(Some("sess"), Some("%1"), "/elsewhere")));
}

#[test]
fn components_do_not_bleed_into_each_other() {
    let a = context(Some("ab"), Some("c"), "/x");
    let b = context(Some("a"), Some("bc"), "/x");
    assert_ne!(compute_scope(&a), compute_scope(&b));
}

#[test]
#[serial]
fn from_env_reads_tmux_variables() {
    std::env::set_var("TMUX", "/tmp/tmux-1000/default,42,0");
    std::env::set_var("TMUX_PANE", "%7");

    let ctx = ScopeContext::from_env().expect("context must load");
    assert_eq!(ctx.session.as_deref(), Some("/tmp/tmux-1000/default,42,0"));
    assert_eq!(ctx.pane.as_deref(), Some("%7"));
    assert_eq!(ctx.cwd, std::env::current_dir().expect("cwd"));

    std::env::remove_var("TMUX");
    std::env::remove_var("TMUX_PANE");
}

#[test]
#[serial]
fn from_env_treats_empty_variables_as_absent() {
    std::env::set_var("TMUX", "");
    std::env::remove_var("TMUX_PANE");

    let ctx = ScopeContext::from_env().expect("context must load");
    assert!(ctx.session.is_none());
    assert!(ctx.pane.is_none());

    std::env::remove_var("TMUX");
}
