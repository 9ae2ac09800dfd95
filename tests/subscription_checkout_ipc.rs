use serde_json::json;
use sha2::{Digest, Sha256};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

const SECRET: &str = "integration-secret";

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .env_remove("SCHOOLD_WORKSPACE")
        .env("SCHOOLD_PAYMENT_SECRET", SECRET)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn sign(intent_id: &str, payment_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{intent_id}|{payment_id}|{SECRET}").as_bytes());
    format!("{:x}", hasher.finalize())
}

fn basic(entered: u32, coupon: Option<&str>) -> serde_json::Value {
    json!({
        "planId": "basic",
        "enteredStudents": entered,
        "futureStudents": 0,
        "couponCode": coupon,
    })
}

fn open_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
}

#[test]
fn price_preview_validates_and_applies_coupons() {
    let workspace = temp_dir("schoold-subscription-preview");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    let plans = request_ok(&mut stdin, &mut reader, "1", "subscription.plans", json!({}));
    let ids = plans["plans"]
        .as_array()
        .expect("plans")
        .iter()
        .map(|p| p["planId"].as_str().unwrap_or("").to_string())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["basic", "standard", "quarterly"]);

    let quoted = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "subscription.pricePreview",
        json!({ "input": basic(50, None) }),
    );
    assert_eq!(quoted["preview"]["billableStudents"], 50);
    assert_eq!(quoted["preview"]["paidAmount"], 6000.0);
    assert_eq!(quoted["quoteId"].as_str().map(str::len), Some(64));

    let invalid = request(
        &mut stdin,
        &mut reader,
        "3",
        "subscription.pricePreview",
        json!({ "input": basic(15, None) }),
    );
    assert_eq!(error_code(&invalid), "validation_failed");
    assert_eq!(
        invalid["error"]["details"]["fieldErrors"]["enteredStudents"],
        "Current students must be a multiple of 10"
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "coupons.upsert",
        json!({ "code": "spring2", "discountMonths": 2 }),
    );
    let discounted = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "subscription.pricePreview",
        json!({ "input": basic(50, Some(" Spring2 ")) }),
    );
    assert_eq!(discounted["preview"]["discountMonths"], 2);
    assert_eq!(discounted["preview"]["discountAmount"], 1000.0);
    assert_eq!(discounted["preview"]["paidAmount"], 5000.0);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "coupons.upsert",
        json!({ "code": "SPRING2", "discountMonths": 2, "active": false }),
    );
    let inactive = request(
        &mut stdin,
        &mut reader,
        "7",
        "subscription.pricePreview",
        json!({ "input": basic(50, Some("spring2")) }),
    );
    assert_eq!(error_code(&inactive), "invalid_coupon");

    let coupons = request_ok(&mut stdin, &mut reader, "8", "coupons.list", json!({}));
    assert_eq!(coupons["coupons"].as_array().map(|a| a.len()), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn checkout_pays_verifies_and_raises_the_capacity_floor() {
    let workspace = temp_dir("schoold-checkout-paid");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    let set = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "checkout.setInputs",
        json!({ "input": basic(50, None) }),
    );
    assert_eq!(set["quoteDiscarded"], false);
    assert_eq!(set["checkout"]["state"], "idle");

    let previewed = request_ok(&mut stdin, &mut reader, "2", "checkout.preview", json!({}));
    assert_eq!(previewed["checkout"]["state"], "previewed");
    assert_eq!(previewed["warnings"], json!([]));
    assert_eq!(previewed["local"]["paidAmount"], previewed["server"]["paidAmount"]);

    // Changing a held quote's inputs drops it.
    let set = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "checkout.setInputs",
        json!({ "input": basic(60, None) }),
    );
    assert_eq!(set["quoteDiscarded"], true);
    let not_ready = request(&mut stdin, &mut reader, "4", "checkout.pay", json!({}));
    assert_eq!(error_code(&not_ready), "invalid_transition");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "checkout.preview",
        json!({ "input": basic(50, None) }),
    );
    let paying = request_ok(&mut stdin, &mut reader, "6", "checkout.pay", json!({}));
    assert_eq!(paying["checkout"]["state"], "paymentInitiated");
    assert_eq!(paying["intent"]["amount"], 6000.0);
    let intent_id = paying["intent"]["intentId"]
        .as_str()
        .expect("intentId")
        .to_string();

    let locked = request(
        &mut stdin,
        &mut reader,
        "7",
        "checkout.setInputs",
        json!({ "input": basic(70, None) }),
    );
    assert_eq!(error_code(&locked), "payment_in_progress");

    let verified = request(
        &mut stdin,
        &mut reader,
        "8",
        "checkout.verify",
        json!({ "paymentId": "pay_001", "signature": sign(&intent_id, "pay_001") }),
    );
    assert_eq!(verified["ok"], true);
    assert_eq!(verified["result"]["checkout"]["state"], "paymentVerified");
    assert_eq!(verified["result"]["activation"]["status"], "active");
    assert!(verified["invalidates"]
        .as_array()
        .expect("invalidates")
        .contains(&json!("invoices")));

    let billable = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "subscription.billableStudents",
        json!({}),
    );
    assert_eq!(billable["committedCapacity"], 50);
    assert_eq!(billable["plans"][0]["status"], "active");

    let below_floor = request(
        &mut stdin,
        &mut reader,
        "10",
        "subscription.pricePreview",
        json!({ "input": basic(40, None) }),
    );
    assert_eq!(error_code(&below_floor), "validation_failed");
    assert_eq!(
        below_floor["error"]["details"]["fieldErrors"]["totalStudents"],
        "Total students (40) cannot be lower than your committed capacity of 50 students"
    );

    let invoices = request_ok(&mut stdin, &mut reader, "11", "subscription.invoices", json!({}));
    let invoices = invoices["invoices"].as_array().expect("invoices");
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0]["paidAmount"], 6000.0);
    assert!(invoices[0]["invoiceNo"]
        .as_str()
        .unwrap_or("")
        .starts_with("INV-"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn bad_signature_fails_the_checkout_and_allows_a_new_preview() {
    let workspace = temp_dir("schoold-checkout-badsig");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "checkout.preview",
        json!({ "input": basic(20, None) }),
    );
    let paying = request_ok(&mut stdin, &mut reader, "2", "checkout.pay", json!({}));
    let intent_id = paying["intent"]["intentId"]
        .as_str()
        .expect("intentId")
        .to_string();

    let failed = request(
        &mut stdin,
        &mut reader,
        "3",
        "checkout.verify",
        json!({ "paymentId": "pay_002", "signature": sign(&intent_id, "pay_other") }),
    );
    assert_eq!(error_code(&failed), "signature_mismatch");
    assert_eq!(failed["error"]["details"]["checkout"]["state"], "paymentFailed");

    // The intent is settled as failed; the gateway path cannot reuse it.
    let replay = request(
        &mut stdin,
        &mut reader,
        "4",
        "payment.verify",
        json!({
            "intentId": intent_id,
            "paymentId": "pay_002",
            "signature": sign(&intent_id, "pay_002")
        }),
    );
    assert_eq!(error_code(&replay), "already_settled");

    let again = request_ok(&mut stdin, &mut reader, "5", "checkout.preview", json!({}));
    assert_eq!(again["checkout"]["state"], "previewed");

    let billable = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "subscription.billableStudents",
        json!({}),
    );
    assert_eq!(billable["committedCapacity"], 0);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn fully_discounted_quote_skips_the_gateway() {
    let workspace = temp_dir("schoold-checkout-free");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    open_workspace(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "coupons.upsert",
        json!({ "code": "FREEQ", "discountMonths": 3 }),
    );
    let input = json!({
        "planId": "quarterly",
        "enteredStudents": 30,
        "futureStudents": 5,
        "couponCode": "freeq",
    });

    let quoted = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "subscription.pricePreview",
        json!({ "input": input }),
    );
    assert_eq!(quoted["preview"]["paidAmount"], 0.0);
    let quote_id = quoted["quoteId"].as_str().expect("quoteId").to_string();

    let no_intent = request(
        &mut stdin,
        &mut reader,
        "3",
        "payment.createIntent",
        json!({ "input": input, "quoteId": quote_id }),
    );
    assert_eq!(error_code(&no_intent), "nothing_to_pay");

    let stale = request(
        &mut stdin,
        &mut reader,
        "4",
        "subscription.createPayment",
        json!({ "input": input, "quoteId": "stale" }),
    );
    assert_eq!(error_code(&stale), "stale_quote");

    // Shrinking the coupon after the preview makes the held quote stale.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4a",
        "checkout.preview",
        json!({ "input": input }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4b",
        "coupons.upsert",
        json!({ "code": "FREEQ", "discountMonths": 2 }),
    );
    let stale_pay = request(&mut stdin, &mut reader, "4c", "checkout.pay", json!({}));
    assert_eq!(error_code(&stale_pay), "stale_quote");
    let after = request_ok(&mut stdin, &mut reader, "4d", "checkout.get", json!({}));
    assert_eq!(after["checkout"]["state"], "idle");
    assert_eq!(after["inputs"]["planId"], "quarterly");
    assert_eq!(after["inputs"]["couponCode"], "freeq");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4e",
        "coupons.upsert",
        json!({ "code": "FREEQ", "discountMonths": 3 }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "checkout.preview",
        json!({ "input": input }),
    );
    let settled = request_ok(&mut stdin, &mut reader, "6", "checkout.pay", json!({}));
    assert_eq!(settled["checkout"]["state"], "paymentVerified");
    assert_eq!(settled["activation"]["status"], "active");

    let billable = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "subscription.billableStudents",
        json!({}),
    );
    assert_eq!(billable["committedCapacity"], 35);

    let health = request_ok(&mut stdin, &mut reader, "8", "health", json!({}));
    assert_eq!(health["checkoutState"], "paymentVerified");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
