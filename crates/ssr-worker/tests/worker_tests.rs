//! Render worker behavior over in-memory streams.
//!
//! A scripted fake renderer sits on the other end of two duplex pipes, so
//! response ordering, cancellation and stream closure are fully controlled by
//! the test.

use serde_json::{json, Value};
use ssr_worker::{CallContext, CancellationToken, ProcessState, RenderWorker, WorkerError};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};

const PIPE_CAPACITY: usize = 64 * 1024;

struct FakeRenderer {
    requests: Lines<BufReader<DuplexStream>>,
    output: DuplexStream,
}

impl FakeRenderer {
    async fn next_request(&mut self) -> Value {
        let line = self
            .requests
            .next_line()
            .await
            .unwrap()
            .expect("worker closed its input stream");
        serde_json::from_str(&line).unwrap()
    }

    async fn send(&mut self, line: &str) {
        self.output.write_all(line.as_bytes()).await.unwrap();
        self.output.write_all(b"\n").await.unwrap();
    }

    async fn reply_html(&mut self, id: &str, html: &str) {
        let line = json!({"id": id, "html": html}).to_string();
        self.send(&line).await;
    }
}

/// A worker attached to a fake renderer that has already signaled ready.
async fn create_test_worker() -> (RenderWorker, FakeRenderer) {
    let (worker_output, renderer_output) = tokio::io::duplex(PIPE_CAPACITY);
    let (worker_input, renderer_input) = tokio::io::duplex(PIPE_CAPACITY);

    let mut renderer = FakeRenderer {
        requests: BufReader::new(renderer_input).lines(),
        output: renderer_output,
    };
    renderer.send(r#"{"type":"ready"}"#).await;

    let worker = RenderWorker::attach(worker_output, worker_input, Duration::from_secs(5))
        .await
        .unwrap();
    (worker, renderer)
}

#[tokio::test]
async fn test_attached_worker_is_running() {
    let (worker, _renderer) = create_test_worker().await;
    assert_eq!(worker.state(), ProcessState::Running);
    assert_eq!(worker.pid(), None);
    assert_eq!(worker.pending_count(), 0);
}

#[tokio::test]
async fn test_request_line_shape() {
    let (worker, mut renderer) = create_test_worker().await;
    let ctx = CallContext::background();

    let call_props = json!({"route": {"kind": "detail", "slug": "hello"}});
    let call = worker.render(&ctx, &call_props);
    let respond = async {
        let request = renderer.next_request().await;
        assert_eq!(request["type"], "render");
        assert_eq!(request["id"], "req-1");
        assert_eq!(request["props"]["route"]["slug"], "hello");
        renderer.reply_html("req-1", "<p>ok</p>").await;
    };

    let (html, ()) = tokio::join!(call, respond);
    assert_eq!(html.unwrap(), "<p>ok</p>");
}

#[tokio::test]
async fn test_concurrent_renders_receive_their_own_outcomes() {
    let (worker, mut renderer) = create_test_worker().await;
    let worker = Arc::new(worker);
    const CALLS: usize = 32;

    let mut tasks = Vec::new();
    for n in 0..CALLS {
        let worker = worker.clone();
        tasks.push(tokio::spawn(async move {
            let html = worker
                .render(&CallContext::background(), &json!({"n": n}))
                .await
                .unwrap();
            (n, html)
        }));
    }

    let mut requests = Vec::new();
    for _ in 0..CALLS {
        requests.push(renderer.next_request().await);
    }
    assert_eq!(worker.pending_count(), CALLS);

    // Answer in reverse arrival order.
    for request in requests.iter().rev() {
        let id = request["id"].as_str().unwrap();
        let html = format!("<p>{}</p>", request["props"]["n"]);
        renderer.reply_html(id, &html).await;
    }

    for task in tasks {
        let (n, html) = task.await.unwrap();
        assert_eq!(html, format!("<p>{}</p>", n));
    }
    assert_eq!(worker.pending_count(), 0);
    assert_eq!(worker.stats().rendered, CALLS as u64);
}

#[tokio::test]
async fn test_success_and_error_are_scoped_to_their_calls() {
    let (worker, mut renderer) = create_test_worker().await;
    let ctx = CallContext::background();

    let ok_props = json!({"page": "ok"});
    let ok = worker.render(&ctx, &ok_props);
    let bad_props = json!({"page": "bad"});
    let bad = worker.render(&ctx, &bad_props);
    let respond = async {
        for _ in 0..2 {
            let request = renderer.next_request().await;
            let id = request["id"].as_str().unwrap().to_string();
            if request["props"]["page"] == "ok" {
                renderer.reply_html(&id, "<p>ok</p>").await;
            } else {
                let line = json!({
                    "id": id,
                    "error": {"message": "boom", "stack": "Error: boom\n    at render"}
                });
                renderer.send(&line.to_string()).await;
            }
        }
    };

    let (ok, bad, ()) = tokio::join!(ok, bad, respond);
    assert_eq!(ok.unwrap(), "<p>ok</p>");
    match bad.unwrap_err() {
        WorkerError::Render { message, stack } => {
            assert_eq!(message, "boom");
            assert!(stack.unwrap().contains("at render"));
        }
        other => panic!("expected render failure, got {:?}", other),
    }

    let stats = worker.stats();
    assert_eq!(stats.rendered, 1);
    assert_eq!(stats.render_failures, 1);
}

#[tokio::test]
async fn test_cancel_before_response_drops_late_reply() {
    let (worker, mut renderer) = create_test_worker().await;
    let token = CancellationToken::new();
    let ctx = CallContext::background().cancel_on(token.clone());

    let call_props = json!({"page": "slow"});
    let call = worker.render(&ctx, &call_props);
    let cancel = async {
        let request = renderer.next_request().await;
        token.cancel();
        request
    };
    let (result, request) = tokio::join!(call, cancel);

    assert!(matches!(result, Err(WorkerError::Canceled)));
    assert_eq!(worker.pending_count(), 0);

    // The late answer is dropped; the next call still works.
    let late_id = request["id"].as_str().unwrap().to_string();
    renderer.reply_html(&late_id, "<p>late</p>").await;

    let next_ctx = CallContext::background();
    let next_props = json!({"page": "next"});
    let next = worker.render(&next_ctx, &next_props);
    let respond = async {
        let request = renderer.next_request().await;
        let id = request["id"].as_str().unwrap().to_string();
        renderer.reply_html(&id, "<p>next</p>").await;
    };
    let (html, ()) = tokio::join!(next, respond);

    assert_eq!(html.unwrap(), "<p>next</p>");
    let stats = worker.stats();
    assert_eq!(stats.canceled, 1);
    assert_eq!(stats.unmatched_responses, 1);
}

#[tokio::test]
async fn test_already_cancelled_context_never_writes() {
    let (worker, mut renderer) = create_test_worker().await;
    let token = CancellationToken::new();
    token.cancel();

    let err = worker
        .render(&CallContext::background().cancel_on(token), &json!({}))
        .await
        .unwrap_err();
    assert!(err.is_cancellation());

    worker.close().await;
    assert!(renderer.requests.next_line().await.unwrap().is_none());
}

#[tokio::test]
async fn test_deadline_exceeded_while_waiting() {
    let (worker, mut renderer) = create_test_worker().await;
    let ctx = CallContext::with_timeout(Duration::from_millis(50));

    let call_props = json!({"page": "hang"});
    let call = worker.render(&ctx, &call_props);
    let ignore = renderer.next_request();
    let (result, _) = tokio::join!(call, ignore);

    let err = result.unwrap_err();
    assert!(matches!(err, WorkerError::DeadlineExceeded));
    assert_eq!(err.http_status_code(), 504);
    assert_eq!(worker.pending_count(), 0);
}

#[tokio::test]
async fn test_output_end_drains_every_pending_call() {
    let (worker, mut renderer) = create_test_worker().await;
    let worker = Arc::new(worker);
    const PENDING: usize = 5;

    let mut tasks = Vec::new();
    for n in 0..PENDING {
        let worker = worker.clone();
        tasks.push(tokio::spawn(async move {
            worker.render(&CallContext::background(), &json!({"n": n})).await
        }));
    }
    for _ in 0..PENDING {
        renderer.next_request().await;
    }

    drop(renderer);

    for task in tasks {
        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("pending call hung after renderer went away")
            .unwrap();
        assert!(matches!(result, Err(WorkerError::WorkerStopped)));
    }
    assert_eq!(worker.state(), ProcessState::Closed);
    assert_eq!(worker.stats().stopped, PENDING as u64);
}

#[tokio::test]
async fn test_malformed_lines_do_not_stop_the_reader() {
    let (worker, mut renderer) = create_test_worker().await;

    let call_ctx = CallContext::background();
    let call_props = json!({});
    let call = worker.render(&call_ctx, &call_props);
    let respond = async {
        let request = renderer.next_request().await;
        let id = request["id"].as_str().unwrap().to_string();
        renderer.send("Listening on http://localhost:3000").await;
        renderer.send(r#"{"id":"req-1","html":"<p>trunc"#).await;
        renderer.send("").await;
        renderer.reply_html(&id, "<p>ok</p>").await;
    };

    let (html, ()) = tokio::join!(call, respond);
    assert_eq!(html.unwrap(), "<p>ok</p>");
    assert_eq!(worker.stats().discarded_lines, 2);
}

#[tokio::test]
async fn test_render_after_close_is_worker_stopped_without_write() {
    let (worker, mut renderer) = create_test_worker().await;
    worker.close().await;

    let err = worker
        .render(&CallContext::background(), &json!({"page": "after"}))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::WorkerStopped));

    assert!(renderer.requests.next_line().await.unwrap().is_none());
    assert_eq!(worker.stats().requests, 0);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (worker, _renderer) = create_test_worker().await;

    worker.close().await;
    worker.close().await;

    assert!(worker.is_closed());
    assert_eq!(worker.state(), ProcessState::Closed);
}

#[tokio::test]
async fn test_dropped_render_future_removes_registration() {
    let (worker, mut renderer) = create_test_worker().await;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        worker.render(&CallContext::background(), &json!({})),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(worker.pending_count(), 0);

    // The request did reach the renderer as one complete line.
    let request = renderer.next_request().await;
    assert_eq!(request["id"], "req-1");
}

#[tokio::test]
async fn test_startup_timeout_without_ready() {
    let (worker_output, _renderer_output) = tokio::io::duplex(PIPE_CAPACITY);
    let (worker_input, _renderer_input) = tokio::io::duplex(PIPE_CAPACITY);

    let err = RenderWorker::attach(worker_output, worker_input, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::StartupTimeout(d) if d == Duration::from_millis(50)));
}

#[tokio::test]
async fn test_output_closed_before_ready_is_worker_stopped() {
    let (worker_output, renderer_output) = tokio::io::duplex(PIPE_CAPACITY);
    let (worker_input, _renderer_input) = tokio::io::duplex(PIPE_CAPACITY);
    drop(renderer_output);

    let err = RenderWorker::attach(worker_output, worker_input, Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::WorkerStopped));
}

#[tokio::test]
async fn test_write_failure_surfaces_transport_error() {
    let (worker, renderer) = create_test_worker().await;
    let FakeRenderer { requests, output } = renderer;
    // Close only the renderer's input side; its output stays open.
    drop(requests);

    let err = worker
        .render(&CallContext::background(), &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::TransportWrite { .. }));
    assert!(err.is_worker_gone());
    assert_eq!(worker.pending_count(), 0);
    assert_eq!(worker.stats().write_failures, 1);
    // A write failure alone does not close the worker.
    assert_eq!(worker.state(), ProcessState::Running);

    drop(output);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_stopped_call_is_counted_when_close_races_renders() {
    let (worker, _renderer) = create_test_worker().await;
    let worker = Arc::new(worker);

    let mut calls = Vec::new();
    for n in 0..64 {
        let call_worker = worker.clone();
        calls.push(tokio::spawn(async move {
            call_worker.render(&CallContext::background(), &json!({"n": n})).await
        }));
        if n == 16 {
            let worker = worker.clone();
            tokio::spawn(async move { worker.close().await });
        }
    }

    let mut stopped = 0;
    for call in calls {
        if let Err(WorkerError::WorkerStopped) = call.await.unwrap() {
            stopped += 1;
        }
    }

    worker.closed().await;
    assert!(stopped > 0);
    assert_eq!(worker.stats().stopped, stopped);
}
