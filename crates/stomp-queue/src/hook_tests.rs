//! Tests for outbound hooks.

use super::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Verify that the event starts with the default encoding of the data.
#[test]
fn test_event_starts_with_default_encoding() {
    let event = dispatch(&NoopHook, json!("hello"));

    assert_eq!(event.data, json!("hello"));
    assert_eq!(event.message, Some(OutboundMessage::text("hello")));
    assert!(!event.is_vetoed());
}

/// Verify that a closure can rewrite the outgoing message.
#[test]
fn test_closure_hook_rewrites_message() {
    let hook = |event: &mut OutboundEvent| {
        if let Some(message) = event.message.as_mut() {
            message.set_header("priority", "9");
        }
    };

    let event = dispatch(&hook, json!({"job": "email"}));

    let message = event.message.expect("message should survive");
    assert_eq!(message.get_header("priority"), Some("9"));
}

/// Verify that hooks run in registration order and each sees prior changes.
#[test]
fn test_chain_runs_in_order() {
    let chain = HookChain::new()
        .with(|event: &mut OutboundEvent| {
            event.message = Some(OutboundMessage::text("first"));
        })
        .with(|event: &mut OutboundEvent| {
            let seen = event
                .message
                .as_ref()
                .map(|m| String::from_utf8_lossy(&m.body).into_owned())
                .unwrap_or_default();
            event.message = Some(OutboundMessage::text(format!("{seen}+second")));
        });

    let event = dispatch(&chain, json!(null));

    assert_eq!(event.message, Some(OutboundMessage::text("first+second")));
}

/// Verify that a veto drops the message.
#[test]
fn test_veto_drops_message() {
    let chain = HookChain::new().with(|event: &mut OutboundEvent| {
        if event.data.get("skip").is_some() {
            event.veto();
        }
    });

    assert!(dispatch(&chain, json!({"skip": true})).is_vetoed());
    assert!(!dispatch(&chain, json!({"keep": true})).is_vetoed());
}

/// Verify that every hook in a chain is invoked exactly once per dispatch.
#[test]
fn test_each_hook_invoked_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut chain = HookChain::new();
    for _ in 0..3 {
        let calls = Arc::clone(&calls);
        chain.push(Arc::new(move |_: &mut OutboundEvent| {
            calls.fetch_add(1, Ordering::SeqCst);
        }));
    }

    dispatch(&chain, json!(1));

    assert_eq!(chain.len(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}
