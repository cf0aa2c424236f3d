mod common;

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc::error::TryRecvError;

use common::*;
use docent_domain::event::{EventKind, SessionEvent};
use docent_domain::tool::Role;
use docent_tools::ObjectStore;

#[tokio::test]
async fn hello_streams_text_then_stop_and_commits_two_messages() {
    let h = harness(
        ScriptedInference::new().stream(reply("Hello! How can I help?")),
        StaticBrowser::new("unused"),
    );
    let (session, conn, mut rx) = connect(&h.state, "s-hello").await;

    session.prompt(&conn, "hello").await.unwrap();
    let events = until_terminal(&mut rx).await;

    let (last, body) = events.split_last().unwrap();
    assert_eq!(*last, SessionEvent::stop());
    assert!(!body.is_empty());
    assert!(body.iter().all(|e| e.kind == EventKind::Text));
    assert_eq!(text_of(&events), "Hello! How can I help?");

    let history = session.messages().await.unwrap();
    assert_eq!(roles(&history), vec![Role::User, Role::Assistant]);
    assert_eq!(history[0].content.extract_all_text(), "hello");
    assert_eq!(history[1].content.extract_all_text(), "Hello! How can I help?");

    // Empty index: the system prompt is the bare instruction.
    let req = h.inference.request(0);
    assert_eq!(system_prompt_of(&req), h.state.config.turn.system_prompt);
    assert_eq!(req.tools.len(), 4);
}

#[tokio::test]
async fn tool_result_feeds_the_next_pass() {
    let browser = StaticBrowser::new("Rust 1.80 was released in July.");
    let h = harness(
        ScriptedInference::new()
            .stream(tool_call("c1", "web_search", json!({"query": "rust release"})))
            .stream(reply("It came out in July.")),
        browser.clone(),
    );
    let (session, conn, mut rx) = connect(&h.state, "s-tool").await;

    session.prompt(&conn, "when was rust 1.80 released?").await.unwrap();
    let events = until_terminal(&mut rx).await;

    assert_eq!(events[0], SessionEvent::status("web_search"));
    assert_eq!(events.last(), Some(&SessionEvent::stop()));
    assert_eq!(text_of(&events), "It came out in July.");

    let urls = browser.urls.lock().clone();
    assert_eq!(urls.len(), 1);
    assert!(urls[0].contains("rust%20release"), "{}", urls[0]);

    assert_eq!(h.inference.request_count(), 2);
    let (content, is_error) = tool_result_in(&h.inference.request(1), "c1").unwrap();
    assert!(!is_error);
    assert_eq!(content, "Rust 1.80 was released in July.");

    // Tool traffic stays out of committed history.
    let history = session.messages().await.unwrap();
    assert_eq!(roles(&history), vec![Role::User, Role::Assistant]);
}

#[tokio::test]
async fn panicking_capability_becomes_a_textual_result() {
    let h = harness(
        ScriptedInference::new()
            .stream(tool_call("c1", "web_search", json!({"query": "anything"})))
            .stream(reply("The search tool is unavailable right now.")),
        Arc::new(PanickingBrowser),
    );
    let (session, conn, mut rx) = connect(&h.state, "s-panic").await;

    session.prompt(&conn, "search please").await.unwrap();
    let events = until_terminal(&mut rx).await;

    assert_eq!(events.last(), Some(&SessionEvent::stop()));
    let (content, is_error) = tool_result_in(&h.inference.request(1), "c1").unwrap();
    assert!(is_error);
    assert!(content.starts_with("error:"), "{content}");
    assert!(content.contains("panicked"), "{content}");
    assert_eq!(session.messages().await.unwrap().len(), 2);
}

#[tokio::test]
async fn failed_navigation_is_text_not_an_error() {
    let h = harness(
        ScriptedInference::new()
            .stream(tool_call("c1", "web_search", json!({"query": "x"})))
            .stream(reply("Could not search.")),
        Arc::new(FailingBrowser),
    );
    let (session, conn, mut rx) = connect(&h.state, "s-nav").await;

    session.prompt(&conn, "search").await.unwrap();
    until_terminal(&mut rx).await;

    let (content, is_error) = tool_result_in(&h.inference.request(1), "c1").unwrap();
    assert!(!is_error);
    assert!(content.starts_with("web search failed"), "{content}");
}

#[tokio::test]
async fn bad_arguments_and_unknown_capabilities_are_reported_to_the_model() {
    let mut first = tool_call("c1", "web_search", json!({"query": "x", "page": 2}));
    first.pop();
    first.extend(tool_call("c2", "exec", json!({"cmd": "ls"})));
    let h = harness(
        ScriptedInference::new()
            .stream(first)
            .stream(reply("Sorry.")),
        StaticBrowser::new("unused"),
    );
    let (session, conn, mut rx) = connect(&h.state, "s-bad").await;

    session.prompt(&conn, "go").await.unwrap();
    let events = until_terminal(&mut rx).await;

    assert_eq!(
        &events[..2],
        &[SessionEvent::status("web_search"), SessionEvent::status("exec")]
    );
    let second = h.inference.request(1);
    let (c1, e1) = tool_result_in(&second, "c1").unwrap();
    assert!(e1 && c1.contains("invalid arguments"), "{c1}");
    let (c2, e2) = tool_result_in(&second, "c2").unwrap();
    assert!(e2 && c2.contains("unknown capability"), "{c2}");
}

#[tokio::test]
async fn model_failure_emits_one_error_and_commits_no_reply() {
    let h = harness(
        ScriptedInference::new()
            .failing_stream("upstream 503")
            .stream(reply("Back again.")),
        StaticBrowser::new("unused"),
    );
    let (session, conn, mut rx) = connect(&h.state, "s-fail").await;

    session.prompt(&conn, "first").await.unwrap();
    let events = until_terminal(&mut rx).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Error);
    assert!(events[0].content.contains("upstream 503"));

    let history = session.messages().await.unwrap();
    assert_eq!(roles(&history), vec![Role::User]);

    // The session is idle again and takes the next turn.
    session.prompt(&conn, "second").await.unwrap();
    let events = until_terminal(&mut rx).await;
    assert_eq!(events.last(), Some(&SessionEvent::stop()));
    let history = session.messages().await.unwrap();
    assert_eq!(roles(&history), vec![Role::User, Role::User, Role::Assistant]);
}

#[tokio::test]
async fn mid_stream_error_discards_partial_text() {
    let mut events = reply("Partial ");
    events.pop();
    events.push(docent_domain::stream::StreamEvent::Error {
        message: "connection reset".into(),
    });
    let h = harness(ScriptedInference::new().stream(events), StaticBrowser::new("unused"));
    let (session, conn, mut rx) = connect(&h.state, "s-mid").await;

    session.prompt(&conn, "hi").await.unwrap();
    let events = until_terminal(&mut rx).await;

    assert_eq!(events[0], SessionEvent::text("Partial "));
    assert_eq!(events.last().unwrap().kind, EventKind::Error);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert_eq!(roles(&session.messages().await.unwrap()), vec![Role::User]);
}

#[tokio::test]
async fn round_trip_bound_forces_termination() {
    let h = harness_with(
        ScriptedInference::new()
            .stream(tool_call("c1", "read_file", json!({"name": "a"})))
            .stream(tool_call("c2", "read_file", json!({"name": "b"})))
            .stream(tool_call("c3", "read_file", json!({"name": "c"}))),
        StaticBrowser::new("unused"),
        |cfg| cfg.turn.max_round_trips = 2,
    );
    let (session, conn, mut rx) = connect(&h.state, "s-bound").await;

    session.prompt(&conn, "loop forever").await.unwrap();
    let events = until_terminal(&mut rx).await;

    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![EventKind::Status, EventKind::Status, EventKind::Info, EventKind::Stop]
    );
    assert_eq!(h.inference.request_count(), 3);

    let (content, _) = tool_result_in(&h.inference.request(1), "c1").unwrap();
    assert!(content.starts_with("not found"), "{content}");

    let history = session.messages().await.unwrap();
    assert_eq!(roles(&history), vec![Role::User, Role::Assistant]);
}

#[tokio::test]
async fn queued_prompts_never_interleave() {
    let h = harness(
        ScriptedInference::new()
            .stream(reply("first answer"))
            .stream(reply("second answer")),
        StaticBrowser::new("unused"),
    );
    let (session, conn, mut rx) = connect(&h.state, "s-order").await;

    session.prompt(&conn, "one").await.unwrap();
    session.prompt(&conn, "two").await.unwrap();

    let a = until_terminal(&mut rx).await;
    let b = until_terminal(&mut rx).await;
    assert_eq!(text_of(&a), "first answer");
    assert_eq!(text_of(&b), "second answer");
    assert_eq!(a.last(), Some(&SessionEvent::stop()));
    assert_eq!(b.last(), Some(&SessionEvent::stop()));

    let history = session.messages().await.unwrap();
    let texts: Vec<String> = history.iter().map(|m| m.content.extract_all_text()).collect();
    assert_eq!(texts, vec!["one", "first answer", "two", "second answer"]);
}

#[tokio::test]
async fn every_attached_connection_sees_the_turn() {
    let h = harness(
        ScriptedInference::new().stream(reply("shared")),
        StaticBrowser::new("unused"),
    );
    let (session, conn, mut rx_a) = connect(&h.state, "s-multi").await;
    let (_, _, mut rx_b) = connect(&h.state, "s-multi").await;

    session.prompt(&conn, "hi").await.unwrap();
    assert_eq!(text_of(&until_terminal(&mut rx_a).await), "shared");
    assert_eq!(text_of(&until_terminal(&mut rx_b).await), "shared");
}

#[tokio::test]
async fn a_stalled_connection_is_detached_without_holding_up_the_turn() {
    let h = harness(
        ScriptedInference::new()
            .stream(reply("one two three four five"))
            .stream(reply("still flowing")),
        StaticBrowser::new("unused"),
    );
    let (session, conn, mut rx) = connect(&h.state, "s-stall").await;
    // Room for a single event, and nobody reads it.
    let (_, _, mut stalled) = connect_with_capacity(&h.state, "s-stall", 1).await;

    session.prompt(&conn, "count").await.unwrap();
    let events = until_terminal(&mut rx).await;
    assert_eq!(text_of(&events), "one two three four five");
    assert_eq!(events.last(), Some(&SessionEvent::stop()));

    session.prompt(&conn, "again").await.unwrap();
    assert_eq!(text_of(&until_terminal(&mut rx).await), "still flowing");

    // The stalled reader kept what fit and was then let go.
    assert_eq!(stalled.try_recv().unwrap().kind, EventKind::Text);
    assert!(matches!(stalled.try_recv(), Err(TryRecvError::Disconnected)));

    let history = session.messages().await.unwrap();
    assert_eq!(history.len(), 4);
}

#[tokio::test]
async fn read_file_returns_stored_text_and_converts_binaries() {
    let h = harness(
        ScriptedInference::new()
            .stream({
                let mut s = tool_call("c1", "read_file", json!({"name": "notes.txt"}));
                s.pop();
                s.extend(tool_call("c2", "read_file", json!({"name": "scan.png"})));
                s
            })
            .stream(reply("Done.")),
        StaticBrowser::new("unused"),
    );
    h.state
        .objects
        .put("notes.txt", b"buy milk", "text/plain")
        .await
        .unwrap();
    h.state
        .objects
        .put("scan.png", &[0x89, b'P', b'N', b'G'], "image/png")
        .await
        .unwrap();
    let (session, conn, mut rx) = connect(&h.state, "s-read").await;

    session.prompt(&conn, "read them").await.unwrap();
    until_terminal(&mut rx).await;

    let second = h.inference.request(1);
    assert_eq!(tool_result_in(&second, "c1").unwrap().0, "buy milk");
    assert!(tool_result_in(&second, "c2")
        .unwrap()
        .0
        .contains("image/png document about lighthouses"));
}

#[tokio::test]
async fn generated_images_are_stored_and_referenced() {
    let h = harness(
        ScriptedInference::new()
            .chat_reply("a red fox in watercolor, soft morning light")
            .stream(tool_call("c1", "generate_image", json!({"prompt": "fox"})))
            .stream(reply("Here is your fox.")),
        StaticBrowser::new("unused"),
    );
    let (session, conn, mut rx) = connect(&h.state, "s-image").await;

    session.prompt(&conn, "draw a fox").await.unwrap();
    until_terminal(&mut rx).await;

    assert_eq!(
        h.inference.image_prompts.lock().clone(),
        vec!["a red fox in watercolor, soft morning light".to_string()]
    );
    let names = h.state.objects.list().await.unwrap();
    assert_eq!(names.len(), 1);
    assert!(names[0].starts_with("images/") && names[0].ends_with(".png"));

    let (content, is_error) = tool_result_in(&h.inference.request(1), "c1").unwrap();
    assert!(!is_error);
    assert!(content.contains(&names[0]), "{content}");
    assert!(!content.contains("PNG"), "result must reference, not inline");
}
