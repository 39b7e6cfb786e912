use nel::runtime::ServerConfig;
use nel::service::run_service;
use serde_json::{Value, json};

async fn serve(lines: &[Value]) -> Vec<Value> {
    let input = lines
        .iter()
        .map(|line| serde_json::to_string(line).unwrap())
        .collect::<Vec<_>>()
        .join("\n");
    serve_raw(&format!("{input}\n")).await
}

async fn serve_raw(input: &str) -> Vec<Value> {
    serve_bytes(input.as_bytes()).await
}

async fn serve_bytes(input: &[u8]) -> Vec<Value> {
    let output = run_service(ServerConfig::default(), input, Vec::new())
        .await
        .unwrap();
    String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn for_context<'a>(frames: &'a [Value], id: &str) -> Vec<&'a Value> {
    frames.iter().filter(|frame| frame["id"] == id).collect()
}

#[tokio::test]
async fn service_announces_itself_first() {
    let frames = serve_raw("").await;
    assert_eq!(frames, vec![json!({"status": "online"})]);
}

#[tokio::test]
async fn service_answers_each_request_kind() {
    let frames = serve(&[
        json!(["run", "var greeting = 'hi'; 1 + 1", "a"]),
        json!(["getAllPropertyNames", "true", "a"]),
        json!(["inspect", "greeting", "a"]),
        json!(["run", "console.log('out', 3); null", "a"]),
    ])
    .await;

    assert_eq!(frames[0], json!({"status": "online"}));
    let frames = for_context(&frames, "a");
    assert_eq!(
        frames,
        vec![
            &json!({"id": "a", "mime": {"text/plain": "2"}, "end": true}),
            &json!({
                "id": "a",
                "names": ["constructor", "toString", "valueOf", "hasOwnProperty", "isPrototypeOf"],
                "end": true
            }),
            &json!({
                "id": "a",
                "inspection": {
                    "string": "hi",
                    "type": "String",
                    "constructorList": ["String", "Object"],
                    "length": 2
                },
                "end": true
            }),
            &json!({"id": "a", "stdout": "out 3\n"}),
            &json!({"id": "a", "mime": {"text/plain": "null"}, "end": true}),
        ]
    );
}

#[tokio::test]
async fn undecodable_lines_go_to_stderr_and_serving_continues() {
    let frames = serve_raw("this is not json\n\n[\"run\", \"'still here'\", \"a\"]\n").await;

    assert_eq!(frames.len(), 3);
    assert!(frames.iter().any(|frame| frame.get("stderr").is_some()));
    assert!(frames.contains(&json!({
        "id": "a",
        "mime": {"text/plain": "'still here'"},
        "end": true
    })));

    let frames = serve_bytes(b"[\"run\",\"1\",\"a\"]\n[\"run\",\"'\xff'\",\"a\"]\n[\"run\",\"2\",\"a\"]\n").await;
    assert_eq!(frames.len(), 4);
    assert!(frames[1..].iter().any(|frame| frame
        .get("stderr")
        .and_then(Value::as_str)
        .is_some_and(|text| text.contains("UTF-8"))));
    assert_eq!(
        for_context(&frames, "a"),
        vec![
            &json!({"id": "a", "mime": {"text/plain": "1"}, "end": true}),
            &json!({"id": "a", "mime": {"text/plain": "2"}, "end": true}),
        ]
    );
}

#[test]
fn deep_recursion_fails_cleanly_on_a_small_stack() {
    let input = format!(
        "{}\n",
        json!(["run", "function f(n){ if (n == 0) return 0; return f(n - 1) + 1; } f(500)", "a"])
    );
    let frames = std::thread::Builder::new()
        .stack_size(2 * 1024 * 1024)
        .spawn(move || {
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap()
                .block_on(serve_raw(&input))
        })
        .unwrap()
        .join()
        .unwrap();

    let frames = for_context(&frames, "a");
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["error"]["ename"], "RangeError");
    assert_eq!(frames[0]["error"]["evalue"], "Maximum call stack size exceeded");
}

#[tokio::test]
async fn deeply_nested_source_is_a_syntax_error() {
    let code = format!("{}1{}", "(".repeat(2000), ")".repeat(2000));
    let frames = serve(&[json!(["run", code, "a"]), json!(["run", "3", "a"])]).await;
    let frames = for_context(&frames, "a");
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["error"]["ename"], "SyntaxError");
    assert_eq!(frames[1]["mime"]["text/plain"], "3");
}

#[tokio::test]
async fn requests_are_answered_by_later_replies() {
    let frames = serve(&[
        json!(["run", "var answer = $$.request({ q: 'ping' }); answer + '!'", "b"]),
        json!(["reply", "pong", "b", 1]),
    ])
    .await;

    assert!(frames.contains(&json!(["request", {"q": "ping"}, "b", 1])));
    assert_eq!(
        for_context(&frames, "b"),
        vec![&json!({"id": "b", "mime": {"text/plain": "'pong!'"}, "end": true})]
    );
}

#[tokio::test]
async fn evaluation_errors_carry_a_traceback() {
    let frames = serve(&[json!(["run", "missing + 1", "c"])]).await;
    assert_eq!(
        for_context(&frames, "c"),
        vec![&json!({
            "id": "c",
            "error": {
                "ename": "ReferenceError",
                "evalue": "missing is not defined",
                "traceback": ["ReferenceError: missing is not defined"]
            },
            "end": true
        })]
    );
}

#[tokio::test]
async fn reply_without_context_is_a_process_fault() {
    let frames = serve(&[json!(["reply", 1, "ghost", 3])]).await;
    assert_eq!(frames.len(), 2);
    assert!(frames[1]["stderr"].as_str().unwrap().contains("ghost"));
}
