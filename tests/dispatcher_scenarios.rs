use nel::runtime::{Action, ContextConfig, Frame, Kernel, Message, Outbox, ServerConfig};
use tokio::sync::mpsc::UnboundedReceiver;

fn kernel(config: ServerConfig) -> (Kernel, UnboundedReceiver<Frame>) {
    let (outbox, frames) = Outbox::channel();
    (Kernel::new(config, outbox), frames)
}

fn drain(frames: &mut UnboundedReceiver<Frame>) -> Vec<Frame> {
    let mut out = Vec::new();
    while let Ok(frame) = frames.try_recv() {
        out.push(frame);
    }
    out
}

fn result_text(frame: &Frame) -> &str {
    match frame {
        Frame::Result { mime, .. } => mime["text/plain"].as_str().unwrap(),
        other => panic!("expected a result frame, got {other:?}"),
    }
}

async fn run(kernel: &Kernel, code: &str, context: &str) {
    kernel
        .dispatcher()
        .on_message(Message::new(Action::Run, code, context))
        .await;
}

#[tokio::test]
async fn contexts_keep_their_own_globals() {
    let (kernel, mut frames) = kernel(ServerConfig::default());
    run(&kernel, "var n = 1", "left").await;
    run(&kernel, "var n = 2", "right").await;
    run(&kernel, "n = n + 10; n", "left").await;
    run(&kernel, "n", "right").await;

    let frames = drain(&mut frames);
    let texts: Vec<_> = frames.iter().map(result_text).collect();
    assert_eq!(texts, vec!["undefined", "undefined", "11", "2"]);
    assert_eq!(kernel.contexts().len(), 2);
}

#[tokio::test]
async fn code_reported_results_are_not_duplicated() {
    let (kernel, mut frames) = kernel(ServerConfig::default());
    run(&kernel, "$$.sendResult('mine'); 'default'", "c").await;
    run(&kernel, "$$.done(); 'ignored'", "c").await;
    run(&kernel, "$$.async(); $$.sendResult(1); $$.sendResult(2)", "c").await;

    let frames = drain(&mut frames);
    let texts: Vec<_> = frames.iter().map(result_text).collect();
    assert_eq!(texts, vec!["'mine'", "undefined", "1"]);
}

#[tokio::test]
async fn async_runs_can_report_errors_themselves() {
    let (kernel, mut frames) = kernel(ServerConfig::default());
    run(&kernel, "$$.async(); $$.sendError(new Error('later'))", "c").await;

    let frames = drain(&mut frames);
    let [Frame::Error { id, error }] = &frames[..] else {
        panic!("expected one error frame, got {frames:?}");
    };
    assert_eq!(id, "c");
    assert_eq!(error.ename, "Error");
    assert_eq!(error.evalue, "later");
}

#[tokio::test]
async fn await_execution_uses_the_low_level_sender() {
    let (kernel, mut frames) = kernel(ServerConfig {
        await_execution: true,
        ..ServerConfig::default()
    });
    run(&kernel, "[1, 'two', { three: 3 }]", "c").await;
    let frames = drain(&mut frames);
    assert_eq!(frames.len(), 1);
    assert_eq!(result_text(&frames[0]), "[ 1, 'two', { three: 3 } ]");

    let context = kernel.contexts().get("c").unwrap();
    assert!(context.config().await_execution);
    assert!(context.is_done());
}

#[tokio::test]
async fn explicit_context_settings_override_defaults() {
    let (kernel, mut frames) = kernel(ServerConfig::default());
    kernel.contexts().create(
        "eager",
        ContextConfig {
            await_execution: true,
        },
    );
    run(&kernel, "1", "eager").await;
    run(&kernel, "1", "lazy").await;

    assert_eq!(drain(&mut frames).len(), 2);
    assert!(kernel.contexts().get("eager").unwrap().config().await_execution);
    assert!(!kernel.contexts().get("lazy").unwrap().config().await_execution);
}

#[tokio::test]
async fn inspect_walks_user_defined_constructors() {
    let (kernel, mut frames) = kernel(ServerConfig::default());
    run(
        &kernel,
        "function Point(x, y) { this.x = x; this.y = y; }",
        "c",
    )
    .await;
    kernel
        .dispatcher()
        .on_message(Message::new(Action::Inspect, "new Point(1, 2)", "c"))
        .await;
    kernel
        .dispatcher()
        .on_message(Message::new(
            Action::GetAllPropertyNames,
            "new Point(1, 2)",
            "c",
        ))
        .await;

    let frames = drain(&mut frames);
    let Frame::Inspection { inspection, .. } = &frames[1] else {
        panic!("expected an inspection frame, got {frames:?}");
    };
    assert_eq!(inspection.kind, "Point");
    assert_eq!(
        inspection.constructor_list,
        Some(vec!["Point".to_string(), "Object".to_string()])
    );
    assert_eq!(inspection.string, "Point { x: 1, y: 2 }");

    let Frame::Names { names, .. } = &frames[2] else {
        panic!("expected a names frame, got {frames:?}");
    };
    assert_eq!(&names[..3], ["x", "y", "constructor"]);
    assert!(names.iter().any(|name| name == "hasOwnProperty"));
}

#[tokio::test]
async fn thrown_values_become_error_frames() {
    let (kernel, mut frames) = kernel(ServerConfig::default());
    run(&kernel, "throw new Error('boom')", "c").await;
    run(&kernel, "throw 42", "c").await;
    run(&kernel, "null.x", "c").await;

    let frames = drain(&mut frames);
    let errors: Vec<_> = frames
        .iter()
        .map(|frame| match frame {
            Frame::Error { error, .. } => (error.ename.as_str(), error.evalue.as_str()),
            other => panic!("expected an error frame, got {other:?}"),
        })
        .collect();
    assert_eq!(errors[0], ("Error", "boom"));
    assert_eq!(errors[1], ("Uncaught", "42"));
    assert_eq!(errors[2].0, "TypeError");
}

#[tokio::test]
async fn debug_mode_mirrors_received_messages() {
    let (kernel, mut frames) = kernel(ServerConfig {
        debug: true,
        ..ServerConfig::default()
    });
    run(&kernel, "1", "c").await;

    let frames = drain(&mut frames);
    let Frame::Log(line) = &frames[0] else {
        panic!("expected a log frame first, got {frames:?}");
    };
    assert!(line.starts_with("RECEIVED: "));
    assert!(line.contains("\"run\""));
    assert!(matches!(frames[1], Frame::Result { .. }));
}

#[tokio::test]
async fn inspect_renders_what_value_of_returns() {
    let (kernel, mut frames) = kernel(ServerConfig::default());
    for code in [
        "({valueOf: function(){ return 42; }})",
        "({valueOf: function(){ throw new Error('no'); }, x: 1})",
        "new Number(5)",
    ] {
        kernel
            .dispatcher()
            .on_message(Message::new(Action::Inspect, code, "c"))
            .await;
    }

    let strings: Vec<_> = drain(&mut frames)
        .into_iter()
        .map(|frame| match frame {
            Frame::Inspection { inspection, .. } => inspection.string,
            other => panic!("expected an inspection frame, got {other:?}"),
        })
        .collect();
    assert_eq!(strings[0], "42");
    assert!(strings[1].contains("x: 1"), "{}", strings[1]);
    assert_eq!(strings[2], "5");
}
