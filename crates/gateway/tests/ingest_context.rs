mod common;

use common::*;
use docent_domain::error::Error;
use docent_tools::ObjectStore;

#[tokio::test]
async fn ingested_text_is_retrieved_into_the_system_prompt() {
    let h = harness(
        ScriptedInference::new().stream(reply("The keeper lit the lamp at dusk.")),
        StaticBrowser::new("unused"),
    );

    let report = h
        .state
        .ingestor
        .ingest(
            "keeper.txt",
            b"The lighthouse keeper lit the lamp every evening at dusk.",
            "text/plain",
        )
        .await
        .unwrap();
    assert_eq!(report.source_id, "keeper.txt");
    assert_eq!(report.chunks_total, 1);
    assert_eq!(report.chunks_indexed, 1);

    let stored = h.state.objects.get("keeper.txt").await.unwrap().unwrap();
    assert_eq!(stored.content_type, "text/plain");

    let (session, conn, mut rx) = connect(&h.state, "s-ctx").await;
    session
        .prompt(&conn, "when did the keeper light the lamp?")
        .await
        .unwrap();
    until_terminal(&mut rx).await;

    let system = system_prompt_of(&h.inference.request(0));
    assert!(system.starts_with(&h.state.config.turn.system_prompt));
    assert!(system.contains("## Context from ingested documents"));
    assert!(system.contains("[1] keeper.txt (part 0)"));
    assert!(system.contains("lit the lamp every evening"));
}

#[tokio::test]
async fn binary_documents_are_converted_before_chunking() {
    let h = harness(ScriptedInference::new(), StaticBrowser::new("unused"));

    let report = h
        .state
        .ingestor
        .ingest("survey.pdf", b"%PDF-1.7 binary", "")
        .await
        .unwrap();
    assert_eq!(report.chunks_indexed, 1);

    // Content type was guessed from the extension and the original bytes kept.
    let stored = h.state.objects.get("survey.pdf").await.unwrap().unwrap();
    assert_eq!(stored.content_type, "application/pdf");
    assert_eq!(stored.bytes, b"%PDF-1.7 binary");

    let hits = h.state.retrieval.query("lighthouses", 3).await;
    assert_eq!(hits.len(), 1);
    assert!(hits[0].text.contains("application/pdf document about lighthouses"));
}

#[tokio::test]
async fn long_documents_are_capped_per_call() {
    let h = harness_with(ScriptedInference::new(), StaticBrowser::new("unused"), |cfg| {
        cfg.retrieval.chunk_size = 100;
        cfg.retrieval.chunk_overlap = 10;
        cfg.retrieval.max_chunks_per_call = 2;
    });

    let text = "beacon ".repeat(100);
    let report = h
        .state
        .ingestor
        .ingest("long.md", text.as_bytes(), "text/markdown")
        .await
        .unwrap();
    assert!(report.chunks_total > 2);
    assert_eq!(report.chunks_indexed, 2);
    assert_eq!(report.chars, text.chars().count());
}

#[tokio::test]
async fn invalid_utf8_text_is_rejected() {
    let h = harness(ScriptedInference::new(), StaticBrowser::new("unused"));
    let err = h
        .state
        .ingestor
        .ingest("bad.txt", &[0xff, 0xfe, 0x00], "text/plain")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{err}");
}
