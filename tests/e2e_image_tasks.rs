
use e2e_harness::{MOCK_API_KEY, TestResult, start_stack};
use serde_json::json;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn generate_image_polls_until_succeeded() -> TestResult<()> {
    let Some((mock, server)) = start_stack(50).await? else {
        return Ok(());
    };
    mock.script_polls(vec![
        json!({ "task_status": "RUNNING" }),
        json!({
            "task_status": "SUCCEEDED",
            "results": [{ "url": "https://x/img.png", "actual_prompt": "a red fox in fresh snow" }]
        }),
    ]);

    let (status, body) = server
        .post_json("/api/generate-image", json!({ "prompt": "a red fox" }))
        .await?;
    assert_eq!(status, 200, "unexpected reply: {}", body);
    assert_eq!(body["message"], "Image generation successful");
    assert_eq!(body["task_id"], "t1");
    assert_eq!(body["results"][0]["url"], "https://x/img.png");
    assert_eq!(body["details"]["task_status"], "SUCCEEDED");

    let requests = mock.requests();
    let submit = &requests[0];
    assert_eq!(submit.path, "/api/v1/services/aigc/text2image/image-synthesis");
    assert_eq!(submit.authorization.as_deref(), Some(format!("Bearer {}", MOCK_API_KEY).as_str()));
    assert_eq!(submit.async_header.as_deref(), Some("enable"));
    assert_eq!(submit.body["input"]["prompt"], "a red fox");
    assert_eq!(submit.body["parameters"]["size"], "1024*1024");
    assert_eq!(submit.body["parameters"]["n"], 1);
    assert_eq!(mock.polls_made(), 2);

    drop(server);
    mock.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn task_that_never_finishes_times_out() -> TestResult<()> {
    let Some((mock, server)) = start_stack(20).await? else {
        return Ok(());
    };
    mock.script_polls(vec![json!({ "task_status": "RUNNING" })]);

    let (status, body) = server
        .post_json("/api/generate-image", json!({ "prompt": "a red fox" }))
        .await?;
    assert_eq!(status, 504, "unexpected reply: {}", body);
    assert_eq!(body["error"], "Image generation task timeout.");
    assert_eq!(body["task_id"], "t1");
    // The harness config caps polling at three attempts.
    assert_eq!(mock.polls_made(), 3);

    drop(server);
    mock.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_task_reports_provider_message() -> TestResult<()> {
    let Some((mock, server)) = start_stack(20).await? else {
        return Ok(());
    };
    mock.script_polls(vec![json!({
        "task_status": "FAILED",
        "code": "DataInspectionFailed",
        "message": "Input data may contain inappropriate content."
    })]);

    let (status, body) = server
        .post_json(
            "/api/image-edit",
            json!({
                "base_image_data": "data:image/png;base64,iVBORw==",
                "style_prompt": "水彩"
            }),
        )
        .await?;
    assert_eq!(status, 500, "unexpected reply: {}", body);
    assert_eq!(body["error"], "Image edit (stylization_all) task FAILED");
    assert_eq!(body["message"], "Input data may contain inappropriate content.");

    let submit = &mock.requests()[0];
    assert_eq!(submit.path, "/api/v1/services/aigc/image2image/image-synthesis");
    assert_eq!(submit.body["input"]["function"], "stylization_all");
    assert_eq!(submit.body["input"]["prompt"], "水彩");

    drop(server);
    mock.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn analyze_image_goes_through_vision_model() -> TestResult<()> {
    let Some((mock, server)) = start_stack(20).await? else {
        return Ok(());
    };
    mock.set_chat_reply("A cat sleeping on a sofa.");

    let (status, body) = server
        .post_json(
            "/api/analyze-image",
            json!({ "imageDataB64": "data:image/png;base64,iVBORw==" }),
        )
        .await?;
    assert_eq!(status, 200, "unexpected reply: {}", body);
    assert_eq!(body["analysis"], "A cat sleeping on a sofa.");
    assert_eq!(body["details"]["model"], "qwen-vl-max");
    assert_eq!(body["details"]["usage"]["total_tokens"], 17);

    let request = &mock.requests()[0];
    assert_eq!(request.path, "/compatible-mode/v1/chat/completions");
    let content = &request.body["messages"][0]["content"];
    assert_eq!(content[0]["image_url"]["url"], "data:image/png;base64,iVBORw==");
    assert_eq!(content[1]["text"], "这张图片里有什么？请详细描述。");

    drop(server);
    mock.shutdown().await;
    Ok(())
}
