use std::process::{Command, Stdio};
use std::io::{Write, BufRead, BufReader};
use std::sync::mpsc::{channel, Sender, Receiver};
use std::thread;
use std::time::Duration;
use serde_json::{json, Value};

/// Helper struct to manage server process with async I/O
struct McpClient {
    child: std::process::Child,
    tx: Sender<Value>,
    rx: Receiver<Value>,
}

impl McpClient {
    fn spawn() -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_taxomap"))
            .current_dir(env!("CARGO_MANIFEST_DIR"))
            .env("TAXOMAP_CATALOG__DATA_DIR", concat!(env!("CARGO_MANIFEST_DIR"), "/data"))
            .env("TAXOMAP_LOG_LEVEL", "warn")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())  // Suppress log output in tests
            .spawn()
            .expect("Failed to spawn taxomap binary");

        let mut stdin = child.stdin.take().expect("Failed to get stdin");
        let stdout = child.stdout.take().expect("Failed to get stdout");

        // Channel for sending requests
        let (req_tx, req_rx) = channel::<Value>();

        // Channel for receiving responses
        let (resp_tx, resp_rx) = channel::<Value>();

        // Thread to write requests to stdin
        thread::spawn(move || {
            while let Ok(request) = req_rx.recv() {
                let request_str = serde_json::to_string(&request).expect("Failed to serialize");
                if writeln!(stdin, "{}", request_str).is_err() {
                    break;
                }
                if stdin.flush().is_err() {
                    break;
                }
            }
        });

        // Thread to read responses from stdout
        thread::spawn(move || {
            let mut reader = BufReader::new(stdout);
            loop {
                let mut line = String::new();
                match reader.read_line(&mut line) {
                    Ok(0) => break, // EOF
                    Ok(_) => {
                        if let Ok(value) = serde_json::from_str::<Value>(&line) {
                            if resp_tx.send(value).is_err() {
                                break;
                            }
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        McpClient {
            child,
            tx: req_tx,
            rx: resp_rx,
        }
    }

    fn send_request(&self, request: Value) -> Option<Value> {
        self.tx.send(request).ok()?;
        self.rx.recv_timeout(Duration::from_secs(5)).ok()
    }

    fn send_notification(&self, notification: Value) {
        let _ = self.tx.send(notification);
        // Notifications don't have responses, give server time to process
        thread::sleep(Duration::from_millis(50));
    }

    /// Handshake: initialize request plus the initialized notification.
    fn initialize(&self) -> Value {
        let response = self.send_request(json!({
            "jsonrpc": "2.0",
            "method": "initialize",
            "id": 1,
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "test", "version": "1.0"}
            }
        }))
        .expect("Failed to initialize");

        self.send_notification(json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        }));
        response
    }

    fn call_tool(&self, id: u64, name: &str, arguments: Value) -> Value {
        self.send_request(json!({
            "jsonrpc": "2.0",
            "method": "tools/call",
            "id": id,
            "params": {
                "name": name,
                "arguments": arguments
            }
        }))
        .unwrap_or_else(|| panic!("Failed to get {} response", name))
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[test]
fn test_initialize_handshake() {
    let client = McpClient::spawn();
    let response = client.initialize();

    // Verify response structure
    assert_eq!(response["jsonrpc"], "2.0");
    assert_eq!(response["id"], 1);
    assert!(response["result"].is_object());

    let result = &response["result"];
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert!(result["capabilities"]["tools"].is_object());
    assert_eq!(result["serverInfo"]["name"], "taxomap");
    assert!(result["serverInfo"]["version"].is_string());
    assert!(result["serverInfo"]["description"].is_string());
}

#[test]
fn test_tool_discovery() {
    let client = McpClient::spawn();
    client.initialize();

    let response = client.send_request(json!({
        "jsonrpc": "2.0",
        "method": "tools/list",
        "id": 2
    }))
    .expect("Failed to get tools/list response");

    assert_eq!(response["id"], 2);
    let tools = response["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 3, "Should have exactly 3 tools");

    let tool_names: Vec<String> = tools.iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect();
    assert!(tool_names.contains(&"map_rows".to_string()));
    assert!(tool_names.contains(&"catalog_info".to_string()));
    assert!(tool_names.contains(&"health_check".to_string()));

    // Verify each tool has required fields
    for tool in tools {
        assert!(tool["name"].is_string());
        assert!(tool["description"].is_string());
        assert!(tool["inputSchema"].is_object());
    }
}

#[test]
fn test_map_rows_preserves_order_and_maps_crosswalk_code() {
    let client = McpClient::spawn();
    client.initialize();

    let response = client.call_tool(2, "map_rows", json!({
        "target_version": "3.0",
        "rows": [
            {"code": "1-4", "label": "Sports", "channel": "ctv"},
            {"label": "xyzxyz-unmappable-token"},
            {"label": "Motorsports"},
            {"label": "   "}
        ]
    }));

    let result = &response["result"];
    assert!(result["isError"].is_null() || result["isError"] == false);

    let content = &result["structuredContent"];
    let rows = content["rows"].as_array().expect("rows should be an array");
    assert_eq!(rows.len(), 4);

    assert_eq!(rows[0]["source_label"], "Sports");
    assert_eq!(rows[0]["target_id"], "3x:AB1");
    assert_eq!(rows[0]["method"], "exact_code");
    assert_eq!(rows[0]["confidence"], 1.0);
    assert_eq!(rows[0]["channel"], "ctv");

    assert_eq!(rows[1]["source_label"], "xyzxyz-unmappable-token");
    assert!(rows[1]["target_id"].is_null());
    assert_eq!(rows[1]["status"], "unmapped");

    assert_eq!(rows[2]["method"], "synonym");
    assert_eq!(rows[2]["target_id"], "3x:AB1");

    assert_eq!(rows[3]["status"], "invalid");

    let summary = &content["summary"];
    assert_eq!(summary["total"], 4);
    assert_eq!(summary["mapped"], 2);
    assert_eq!(summary["invalid"], 1);
    let audit = summary["unmapped_audit"].as_array().unwrap();
    assert!(audit.iter().any(|e| e["index"] == 1));

    assert_eq!(content["projection"]["cattax"], 7);
    assert_eq!(content["projection"]["category_string"], "3x:AB1");
}

#[test]
fn test_map_rows_rejects_unknown_target_version() {
    let client = McpClient::spawn();
    client.initialize();

    let response = client.call_tool(2, "map_rows", json!({
        "target_version": "9.9",
        "rows": [{"label": "Sports"}]
    }));

    let result = &response["result"];
    assert_eq!(result["isError"], true, "Should have isError: true");
    let content_arr = result["content"].as_array().expect("content should be array");
    let error_text = content_arr[0]["text"].as_str().expect("should have error text");
    assert!(error_text.contains("target_version"), "Error should name the field: {}", error_text);
}

#[test]
fn test_map_rows_rejects_invalid_options() {
    let client = McpClient::spawn();
    client.initialize();

    let response = client.call_tool(2, "map_rows", json!({
        "rows": [{"label": "Sports"}],
        "options": {"fuzzy_cut": 1.5}
    }));

    let result = &response["result"];
    assert_eq!(result["isError"], true);
    let content_arr = result["content"].as_array().expect("content should be array");
    let error_text = content_arr[0]["text"].as_str().expect("should have error text");
    assert!(error_text.contains("fuzzy_cut"), "Error should mention fuzzy_cut: {}", error_text);
}

#[test]
fn test_catalog_info() {
    let client = McpClient::spawn();
    client.initialize();

    let response = client.call_tool(2, "catalog_info", json!({}));
    let info = &response["result"]["structuredContent"];
    assert_eq!(info["target_version"], "3.0");
    assert_eq!(info["source_version"], "2.x");
    assert!(info["target_nodes"].as_u64().unwrap() > 10);
    assert!(info["scd_nodes"].as_u64().unwrap() >= 1);
}

#[test]
fn test_health_check() {
    let client = McpClient::spawn();
    client.initialize();

    let response = client.call_tool(2, "health_check", json!({}));

    assert_eq!(response["jsonrpc"], "2.0");
    assert_eq!(response["id"], 2);
    let result = &response["result"];
    assert!(result["isError"].is_null() || result["isError"] == false);

    if result["structuredContent"].is_object() {
        let health = &result["structuredContent"];
        assert_eq!(health["status"], "ok");
        assert!(health["version"].is_string());
        assert!(health["uptime_seconds"].is_number());
        assert_eq!(health["semantic"]["available"], false);
    }
}

#[test]
fn test_out_of_range_config_aborts_startup() {
    let output = Command::new(env!("CARGO_BIN_EXE_taxomap"))
        .current_dir(env!("CARGO_MANIFEST_DIR"))
        .env("TAXOMAP_CATALOG__DATA_DIR", concat!(env!("CARGO_MANIFEST_DIR"), "/data"))
        .env("TAXOMAP_MAPPING__FUZZY_CUT", "1.5")
        .arg("check")
        .stdin(Stdio::null())
        .output()
        .expect("Failed to run taxomap binary");

    assert!(!output.status.success(), "Startup should fail on fuzzy_cut = 1.5");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("fuzzy_cut"), "stderr should name the field: {}", stderr);
}

#[test]
fn test_out_of_range_config_refuses_to_serve() {
    let output = Command::new(env!("CARGO_BIN_EXE_taxomap"))
        .current_dir(env!("CARGO_MANIFEST_DIR"))
        .env("TAXOMAP_CATALOG__DATA_DIR", concat!(env!("CARGO_MANIFEST_DIR"), "/data"))
        .env("TAXOMAP_MAPPING__CONFIDENCE_MIN", "-0.1")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .output()
        .expect("Failed to run taxomap binary");

    assert!(!output.status.success());
}
