//! Poll-loop behavior against a mocked approval API: direct approval,
//! reviewer gating, the seal and invoice judgment flows and the per
//! instance judgment cache.

mod support;

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use larkdesk::engine::AutoApprovalEngine;
use larkdesk::fields::FieldCache;
use larkdesk::llm::{InvoiceReview, SealJudgment};
use larkdesk::platform::FeishuClient;
use larkdesk::rules::{RuleSet, RuleStore};
use larkdesk::tickets::TicketKind;

use support::{ScriptedClassifier, mount_token, test_config};

fn engine(
    server: &MockServer,
    rules_yaml: &str,
    classifier: Arc<ScriptedClassifier>,
) -> AutoApprovalEngine {
    let config = test_config(&server.uri());
    let platform = Arc::new(FeishuClient::with_base_url(&server.uri(), "a", "b"));
    let rules = Arc::new(RuleStore::from_set(
        RuleSet::parse(rules_yaml).expect("rules yaml should parse"),
    ));
    let fields = Arc::new(FieldCache::new(platform.clone()));
    AutoApprovalEngine::new(&config, platform, rules, fields, classifier)
}

/// Query mock answering one kind's PENDING lookup with fixed codes.
async fn mount_query(server: &MockServer, kind: TicketKind, codes: &[&str]) {
    Mock::given(method("POST"))
        .and(path("/approval/v4/instances/query"))
        .and(body_partial_json(json!({
            "approval_code": kind.approval_code(),
            "instance_status": "PENDING",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "instance_code_list": codes, "page_token": "" },
        })))
        .mount(server)
        .await;
}

async fn mount_detail(server: &MockServer, instance: &str, form: &serde_json::Value, task_id: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/approval/v4/instances/{instance}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": {
                "instance_code": instance,
                "status": "PENDING",
                "form": form.to_string(),
                "task_list": [
                    { "id": task_id, "user_id": "u_rev", "status": "PENDING" },
                ],
            },
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn plain_rule_approves_without_the_model() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_query(&server, TicketKind::Purchase, &["I-100"]).await;
    mount_detail(&server, "I-100", &json!([]), "t-1").await;
    Mock::given(method("POST"))
        .and(path("/approval/v4/tasks/approve"))
        .and(body_partial_json(json!({
            "instance_code": "I-100",
            "user_id": "u_rev",
            "task_id": "t-1",
            "comment": "已核实，已自动审批通过。",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "data": {} })))
        .expect(1)
        .mount(&server)
        .await;

    let classifier = Arc::new(ScriptedClassifier::default());
    let engine = engine(
        &server,
        "operators: [\"u_rev\"]\ndefault_enabled: true\nrules:\n  purchase: {}\n",
        classifier.clone(),
    );
    engine.poll_once().await;

    assert_eq!(classifier.classify_calls(), 0);
    assert_eq!(classifier.review_calls(), 0);
}

#[tokio::test]
async fn rule_pass_comment_overrides_the_default() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_query(&server, TicketKind::Purchase, &["I-110"]).await;
    mount_detail(&server, "I-110", &json!([]), "t-1").await;
    Mock::given(method("POST"))
        .and(path("/approval/v4/tasks/approve"))
        .and(body_partial_json(json!({ "comment": "常规采购，核查通过" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "data": {} })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(
        &server,
        "operators: [\"u_rev\"]\ndefault_enabled: true\nrules:\n  purchase: { pass_comment: \"常规采购，核查通过\" }\n",
        Arc::new(ScriptedClassifier::default()),
    );
    engine.poll_once().await;
}

#[tokio::test]
async fn disabled_reviewers_suppress_polling_entirely() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/approval/v4/instances/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0, "data": { "instance_code_list": [] },
        })))
        .expect(0)
        .mount(&server)
        .await;

    // default_enabled defaults to off, so the lone reviewer is disabled.
    let engine = engine(
        &server,
        "operators: [\"u_rev\"]\nrules:\n  purchase: {}\n",
        Arc::new(ScriptedClassifier::default()),
    );
    engine.poll_once().await;
}

#[tokio::test]
async fn instances_without_a_reviewer_task_are_left_alone() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_query(&server, TicketKind::Purchase, &["I-120"]).await;
    // Pending task belongs to someone outside the allowlist.
    Mock::given(method("GET"))
        .and(path("/approval/v4/instances/I-120"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": {
                "instance_code": "I-120",
                "form": "[]",
                "task_list": [
                    { "id": "t-1", "user_id": "u_someone_else", "status": "PENDING" },
                    { "id": "t-2", "user_id": "u_rev", "status": "DONE" },
                ],
            },
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/approval/v4/tasks/approve"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "data": {} })))
        .expect(0)
        .mount(&server)
        .await;

    let engine = engine(
        &server,
        "operators: [\"u_rev\"]\ndefault_enabled: true\nrules:\n  purchase: {}\n",
        Arc::new(ScriptedClassifier::default()),
    );
    engine.poll_once().await;
}

#[tokio::test]
async fn one_broken_instance_does_not_block_the_rest() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_query(&server, TicketKind::Purchase, &["I-1", "I-2"]).await;
    Mock::given(method("GET"))
        .and(path("/approval/v4/instances/I-1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_detail(&server, "I-2", &json!([]), "t-2").await;
    Mock::given(method("POST"))
        .and(path("/approval/v4/tasks/approve"))
        .and(body_partial_json(json!({ "instance_code": "I-2" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "data": {} })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(
        &server,
        "operators: [\"u_rev\"]\ndefault_enabled: true\nrules:\n  purchase: {}\n",
        Arc::new(ScriptedClassifier::default()),
    );
    engine.poll_once().await;
}

#[tokio::test]
async fn non_compliant_seal_document_is_rejected_with_findings() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_query(&server, TicketKind::SealUse, &["I-200"]).await;

    let definition = json!([
        { "id": "w-seal", "type": "input", "name": "印章类型" },
        { "id": "w-doc", "type": "input", "name": "文件名称" },
        { "id": "w-att", "type": "attachV2", "name": "附件" },
    ])
    .to_string();
    Mock::given(method("GET"))
        .and(path(format!(
            "/approval/v4/approvals/{}",
            TicketKind::SealUse.approval_code()
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "approval_name": "用印申请", "form": definition },
        })))
        .mount(&server)
        .await;

    let form = json!([
        { "id": "w-seal", "type": "input", "value": "公章" },
        { "id": "w-doc", "type": "input", "value": "借款合同" },
        { "id": "w-att", "type": "attachV2", "value": [
            { "file_token": "tok-loan", "name": "借款合同.txt" },
        ]},
    ]);
    mount_detail(&server, "I-200", &form, "t-9").await;
    Mock::given(method("GET"))
        .and(path("/drive/v1/files/tok-loan/download"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes("甲方向乙方借款人民币伍拾万元整".as_bytes().to_vec()),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/approval/v4/tasks/reject"))
        .and(body_partial_json(json!({
            "task_id": "t-9",
            "comment": "【不符合自动审批规则】\n借款类文件不符合用印规范\n风险点：文件性质为借款合同；缺少担保条款\n请人工审批。",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "data": {} })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/approval/v4/tasks/approve"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "data": {} })))
        .expect(0)
        .mount(&server)
        .await;

    let classifier = Arc::new(ScriptedClassifier::default());
    classifier.push_seal(SealJudgment {
        compliant: false,
        risk_points: vec!["文件性质为借款合同".to_string(), "缺少担保条款".to_string()],
        comment: "借款类文件不符合用印规范".to_string(),
    });
    let engine = engine(
        &server,
        "operators: [\"u_rev\"]\ndefault_enabled: true\nrules:\n  seal-use: { ai_review: true }\n",
        classifier,
    );
    engine.poll_once().await;
}

#[tokio::test]
async fn seal_ticket_without_attachments_waits_for_a_human() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_query(&server, TicketKind::SealUse, &["I-210"]).await;

    let definition = json!([
        { "id": "w-seal", "type": "input", "name": "印章类型" },
    ])
    .to_string();
    Mock::given(method("GET"))
        .and(path(format!(
            "/approval/v4/approvals/{}",
            TicketKind::SealUse.approval_code()
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "approval_name": "用印申请", "form": definition },
        })))
        .mount(&server)
        .await;
    let form = json!([{ "id": "w-seal", "type": "input", "value": "公章" }]);
    mount_detail(&server, "I-210", &form, "t-3").await;
    Mock::given(method("POST"))
        .and(path("/approval/v4/instances/I-210/comments"))
        .and(body_partial_json(json!({
            "content": "【自动审批】用印申请单缺少附件，无法进行 AI 分析，请人工审批。",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "data": {} })))
        .expect(1)
        .mount(&server)
        .await;

    let engine = engine(
        &server,
        "operators: [\"u_rev\"]\ndefault_enabled: true\nrules:\n  seal-use: { ai_review: true }\n",
        Arc::new(ScriptedClassifier::default()),
    );
    engine.poll_once().await;
}

#[tokio::test]
async fn contract_only_invoice_is_commented_once_and_cached() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_query(&server, TicketKind::Invoice, &["I-300"]).await;

    let form = json!([
        { "id": "w-att", "type": "attachV2", "value": [
            { "file_token": "tok-c", "name": "服务合同.pdf" },
        ]},
    ]);
    mount_detail(&server, "I-300", &form, "t-5").await;
    Mock::given(method("GET"))
        .and(path("/drive/v1/files/tok-c/download"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 contract".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/approval/v4/instances/I-300/comments"))
        .and(body_partial_json(json!({
            "content": "【自动审批】仅上传合同，缺少结算单，请人工审批。",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "data": {} })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/approval/v4/tasks/approve"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "data": {} })))
        .expect(0)
        .mount(&server)
        .await;

    let classifier = Arc::new(ScriptedClassifier::default());
    classifier.push_invoice(InvoiceReview {
        only_contract: true,
        attachment_types: vec!["合同".to_string()],
        comment: "【自动审批】仅上传合同，缺少结算单，请人工审批。".to_string(),
    });
    let engine = engine(
        &server,
        "operators: [\"u_rev\"]\ndefault_enabled: true\nrules:\n  invoice: { ai_review: true }\n",
        classifier.clone(),
    );

    engine.poll_once().await;
    // The second cycle hits the judgment cache: no new review, no second
    // comment on the instance.
    engine.poll_once().await;

    assert_eq!(classifier.review_calls(), 1);
}

#[tokio::test]
async fn settled_invoice_is_approved_with_the_review_comment() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_query(&server, TicketKind::Invoice, &["I-310"]).await;

    let form = json!([
        { "id": "w-att", "type": "attachV2", "value": [
            { "file_token": "tok-s", "name": "结算单.txt" },
            { "file_token": "tok-c", "name": "服务合同.pdf" },
        ]},
    ]);
    mount_detail(&server, "I-310", &form, "t-6").await;
    Mock::given(method("GET"))
        .and(path("/drive/v1/files/tok-s/download"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes("结算金额：32000元".as_bytes().to_vec()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/drive/v1/files/tok-c/download"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 contract".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/approval/v4/tasks/approve"))
        .and(body_partial_json(json!({
            "instance_code": "I-310",
            "comment": "已核对结算单与合同，金额一致。",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "data": {} })))
        .expect(1)
        .mount(&server)
        .await;

    let classifier = Arc::new(ScriptedClassifier::default());
    classifier.push_invoice(InvoiceReview {
        only_contract: false,
        attachment_types: vec!["结算单".to_string(), "合同".to_string()],
        comment: "已核对结算单与合同，金额一致。".to_string(),
    });
    let engine = engine(
        &server,
        "operators: [\"u_rev\"]\ndefault_enabled: true\nrules:\n  invoice: { ai_review: true }\n",
        classifier,
    );
    engine.poll_once().await;
}

#[tokio::test]
async fn empty_review_comment_falls_back_to_the_kind_default() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    mount_query(&server, TicketKind::Invoice, &["I-320"]).await;

    let form = json!([
        { "id": "w-att", "type": "attach", "value": ["tok-s"] },
    ]);
    mount_detail(&server, "I-320", &form, "t-7").await;
    Mock::given(method("GET"))
        .and(path("/drive/v1/files/tok-s/download"))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes("结算金额：500元".as_bytes().to_vec()),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/approval/v4/tasks/approve"))
        .and(body_partial_json(json!({
            "comment": "开票申请已核实，已自动审批通过。",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "data": {} })))
        .expect(1)
        .mount(&server)
        .await;

    let classifier = Arc::new(ScriptedClassifier::default());
    classifier.push_invoice(InvoiceReview {
        only_contract: false,
        attachment_types: vec!["结算单".to_string()],
        comment: String::new(),
    });
    let engine = engine(
        &server,
        "operators: [\"u_rev\"]\ndefault_enabled: true\nrules:\n  invoice: { ai_review: true }\n",
        classifier,
    );
    engine.poll_once().await;
}

#[tokio::test]
async fn excluded_kinds_are_never_queried() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path("/approval/v4/instances/query"))
        .and(body_partial_json(json!({
            "approval_code": TicketKind::Purchase.approval_code(),
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0, "data": { "instance_code_list": [] },
        })))
        .expect(0)
        .mount(&server)
        .await;

    let engine = engine(
        &server,
        "operators: [\"u_rev\"]\ndefault_enabled: true\nrules:\n  purchase: {}\nexclude: [purchase]\n",
        Arc::new(ScriptedClassifier::default()),
    );
    engine.poll_once().await;
}
