mod common;

use common::{find, query, register, Client, TestDaemon, CLASSIFIER_OFF};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[test]
fn daemon_session_lifecycle_scenario() {
    let Some(daemon) = TestDaemon::start("attn-smoke-lifecycle", CLASSIFIER_OFF) else {
        return;
    };

    let health = daemon.request(json!({"cmd": "health"}));
    assert!(health.ok, "health response was not ok");
    let status = health
        .data
        .as_ref()
        .and_then(|data| data.get("status"))
        .and_then(|value| value.as_str())
        .unwrap_or("missing");
    assert_eq!(status, "ok");

    let response = daemon.request(json!({"cmd":"register","id":"abc","label":"t","cwd":"/tmp"}));
    assert!(response.ok);
    let sessions = query(&daemon);
    assert_eq!(find(&sessions, "abc").expect("abc registered")["state"], "working");

    let response = daemon.request(json!({"cmd":"state","id":"abc","state":"waiting_input"}));
    assert!(response.ok);
    let sessions = query(&daemon);
    assert_eq!(find(&sessions, "abc").unwrap()["state"], "waiting_input");

    let response = daemon.request(json!({"cmd":"todos","id":"abc","todos":["[ ] a","[ ] b"]}));
    assert!(response.ok);
    let sessions = query(&daemon);
    assert_eq!(find(&sessions, "abc").unwrap()["todos"], json!(["[ ] a", "[ ] b"]));

    let response = daemon.request(json!({"cmd":"unregister","id":"abc"}));
    assert!(response.ok);
    assert!(find(&query(&daemon), "abc").is_none());
}

#[test]
fn daemon_duplicate_register_keeps_one_entry() {
    let Some(daemon) = TestDaemon::start("attn-smoke-duplicate", CLASSIFIER_OFF) else {
        return;
    };

    register(&daemon, "s1");
    let response = daemon.request(json!({"cmd":"state","id":"s1","state":"idle"}));
    assert!(response.ok);
    register(&daemon, "s1");

    let sessions = query(&daemon);
    let matching: Vec<&Value> = sessions.iter().filter(|s| s["id"] == "s1").collect();
    assert_eq!(matching.len(), 1);
    assert_eq!(matching[0]["state"], "working");
}

#[test]
fn daemon_rejects_state_for_unknown_session() {
    let Some(daemon) = TestDaemon::start("attn-smoke-unknown", CLASSIFIER_OFF) else {
        return;
    };

    let response = daemon.request(json!({"cmd":"state","id":"ghost","state":"idle"}));
    assert!(!response.ok);
    assert_eq!(response.code.as_deref(), Some("unknown_session"));
    assert!(response.error.unwrap_or_default().contains("ghost"));
    assert!(find(&query(&daemon), "ghost").is_none());
}

#[test]
fn daemon_reports_bad_lines_and_keeps_the_connection() {
    let Some(daemon) = TestDaemon::start("attn-smoke-badline", CLASSIFIER_OFF) else {
        return;
    };

    let mut client = daemon.client();
    client.send_raw(b"{\"cmd\": \n");
    let bad = client.read_response();
    assert!(!bad.ok);
    assert_eq!(bad.code.as_deref(), Some("invalid_json"));

    let unknown = client.request(json!({"cmd": "launch_rockets"}));
    assert!(!unknown.ok);
    assert_eq!(unknown.code.as_deref(), Some("unknown_command"));
    assert_eq!(unknown.error.as_deref(), Some("unknown command: launch_rockets"));

    let invalid = client.request(json!({"cmd": "state", "id": "x", "state": "asleep"}));
    assert_eq!(invalid.code.as_deref(), Some("invalid_params"));

    let health = client.request(json!({"cmd": "health"}));
    assert!(health.ok);
}

#[test]
fn daemon_broadcasts_each_mutation_in_commit_order() {
    let Some(daemon) = TestDaemon::start("attn-smoke-broadcast", CLASSIFIER_OFF) else {
        return;
    };

    let (mut first, initial) = Client::subscribe(&daemon.socket);
    assert_eq!(initial["sessions"], json!([]));
    let (mut second, initial) = Client::subscribe(&daemon.socket);
    assert_eq!(initial["sessions"], json!([]));

    let mut client = daemon.client();
    for request in [
        json!({"cmd":"register","id":"s1","label":"t","cwd":"/tmp"}),
        json!({"cmd":"state","id":"s1","state":"pending_approval"}),
        json!({"cmd":"todos","id":"s1","todos":["[ ] a"]}),
        json!({"cmd":"heartbeat","id":"s1"}),
        json!({"cmd":"state","id":"ghost","state":"idle"}),
        json!({"cmd":"unregister","id":"s1"}),
    ] {
        client.request(request);
    }

    let events: Vec<Value> = (0..4).map(|_| first.read_value()).collect();
    let mirrored: Vec<Value> = (0..4).map(|_| second.read_value()).collect();
    assert_eq!(events, mirrored, "observers saw different streams");

    let names: Vec<&str> = events
        .iter()
        .map(|event| event["event"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        vec!["session_added", "state_changed", "todos_changed", "session_removed"]
    );
    assert_eq!(events[0]["replaced"], false);
    assert_eq!(events[1]["old_state"], "working");
    assert_eq!(events[1]["new_state"], "pending_approval");
    assert_eq!(events[2]["todos"], json!(["[ ] a"]));
    assert_eq!(events[3]["id"], "s1");
}

fn apply(view: &mut BTreeMap<String, String>, event: &Value) {
    let id = event["id"]
        .as_str()
        .or_else(|| event["session"]["id"].as_str())
        .unwrap_or_default()
        .to_string();
    match event["event"].as_str() {
        Some("session_added") => {
            view.insert(id, event["session"]["state"].as_str().unwrap().to_string());
        }
        Some("state_changed") => {
            view.insert(id, event["new_state"].as_str().unwrap().to_string());
        }
        Some("session_removed") => {
            view.remove(&id);
        }
        _ => {}
    }
}

fn snapshot_view(sessions: &Value) -> BTreeMap<String, String> {
    sessions
        .as_array()
        .unwrap()
        .iter()
        .map(|session| {
            (
                session["id"].as_str().unwrap().to_string(),
                session["state"].as_str().unwrap().to_string(),
            )
        })
        .collect()
}

#[test]
fn daemon_reconnect_snapshot_matches_live_view() {
    let Some(daemon) = TestDaemon::start("attn-smoke-reconnect", CLASSIFIER_OFF) else {
        return;
    };

    let (mut steady, initial) = Client::subscribe(&daemon.socket);
    let mut live = snapshot_view(&initial["sessions"]);
    let mut flaky = Some(Client::subscribe(&daemon.socket).0);

    let mut client = daemon.client();
    let mut expected_events = 0;
    for (i, id) in ["a", "b", "c"].iter().enumerate() {
        client.request(json!({"cmd":"register","id":id,"label":"t","cwd":"/tmp"}));
        expected_events += 1;
        if i == 1 {
            drop(flaky.take());
        }
    }
    for request in [
        json!({"cmd":"state","id":"a","state":"idle"}),
        json!({"cmd":"state","id":"b","state":"waiting_input"}),
        json!({"cmd":"unregister","id":"c"}),
        json!({"cmd":"state","id":"a","state":"working"}),
    ] {
        assert!(client.request(request).ok);
        expected_events += 1;
    }

    for _ in 0..expected_events {
        let event = steady.read_value();
        apply(&mut live, &event);
    }

    let (_rejoined, initial) = Client::subscribe(&daemon.socket);
    let rejoined = snapshot_view(&initial["sessions"]);
    assert_eq!(rejoined, live);

    let queried = snapshot_view(&Value::Array(query(&daemon)));
    assert_eq!(queried, live);
    assert_eq!(live.get("a").map(String::as_str), Some("working"));
    assert_eq!(live.get("b").map(String::as_str), Some("waiting_input"));
    assert!(!live.contains_key("c"));
}

#[test]
fn daemon_observer_can_mute_and_undo() {
    let Some(daemon) = TestDaemon::start("attn-smoke-mute", CLASSIFIER_OFF) else {
        return;
    };
    register(&daemon, "s1");

    let (mut observer, initial) = Client::subscribe(&daemon.socket);
    assert_eq!(initial["sessions"][0]["muted"], false);

    observer.send(&json!({"cmd": "mute", "id": "s1"}));
    let event = observer.read_value();
    assert_eq!(event["event"], "mute_changed");
    assert_eq!(event["muted"], true);
    let reply = observer.read_value();
    assert_eq!(reply, json!({"ok": true, "muted": true}));

    let sessions = query(&daemon);
    assert_eq!(find(&sessions, "s1").unwrap()["muted"], true);

    // Muted sessions still broadcast state changes.
    assert!(daemon
        .request(json!({"cmd":"state","id":"s1","state":"idle"}))
        .ok);
    assert_eq!(observer.read_value()["event"], "state_changed");

    observer.send(&json!({"cmd": "undo_mute"}));
    let event = observer.read_value();
    assert_eq!(event["event"], "mute_changed");
    assert_eq!(event["muted"], false);
    assert_eq!(observer.read_value()["ok"], true);

    let again = daemon.request(json!({"cmd": "undo_mute"}));
    assert_eq!(again.code.as_deref(), Some("nothing_to_undo"));

    observer.send(&json!({"cmd": "subscribe"}));
    assert_eq!(observer.read_value()["code"], "already_subscribed");
}

#[test]
fn daemon_stop_with_pending_todos_waits_for_input() {
    let Some(daemon) = TestDaemon::start("attn-smoke-stop-todos", CLASSIFIER_OFF) else {
        return;
    };
    register(&daemon, "s1");
    daemon.request(json!({"cmd":"todos","id":"s1","todos":["[✓] a","[ ] b"]}));

    let response = daemon.request(json!({"cmd":"stop","id":"s1","message":"Done for now."}));
    assert!(response.ok);
    assert_eq!(response.state.map(|s| s.as_str()), Some("waiting_input"));
}

#[test]
fn daemon_stop_uses_classifier_verdict() {
    let (_scripts, config) =
        classifier_script("cat >/dev/null\necho '{\"verdict\":\"WAITING\"}'", 5);
    let Some(daemon) = TestDaemon::start("attn-smoke-stop-verdict", &config) else {
        return;
    };

    register(&daemon, "s1");
    let (mut observer, _) = Client::subscribe(&daemon.socket);
    let response =
        daemon.request(json!({"cmd":"stop","id":"s1","message":"Want me to open a PR?"}));
    assert!(response.ok);
    assert_eq!(response.state.map(|s| s.as_str()), Some("waiting_input"));

    let event = observer.read_value();
    assert_eq!(event["event"], "state_changed");
    assert_eq!(event["new_state"], "waiting_input");
}

/// Writes a classifier script and returns a config that runs it.
fn classifier_script(body: &str, timeout_secs: u64) -> (tempfile::TempDir, String) {
    use std::os::unix::fs::PermissionsExt;

    let scripts = tempfile::Builder::new()
        .prefix("attn-classifier")
        .tempdir_in("/tmp")
        .expect("scripts dir");
    let script = scripts.path().join("classify.sh");
    std::fs::write(&script, format!("#!/bin/sh\n{}\n", body)).expect("write script");
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
        .expect("chmod script");
    let config = format!(
        "[classifier]\ntimeout_secs = {}\n\n[classifier.agents.claude]\nprogram = \"{}\"\nargs = []\n",
        timeout_secs,
        script.display()
    );
    (scripts, config)
}

#[test]
fn daemon_stop_classifier_timeout_commits_idle() {
    let (_scripts, config) = classifier_script("exec sleep 30", 1);
    let Some(daemon) = TestDaemon::start("attn-smoke-stop-timeout", &config) else {
        return;
    };

    register(&daemon, "s1");
    let (mut observer, _) = Client::subscribe(&daemon.socket);

    let started = Instant::now();
    let response =
        daemon.request(json!({"cmd":"stop","id":"s1","message":"Should I keep going?"}));
    assert!(response.ok);
    assert_eq!(response.state.map(|s| s.as_str()), Some("idle"));
    assert!(started.elapsed() < Duration::from_secs(8));

    let event = observer.read_value();
    assert_eq!(event["event"], "state_changed");
    assert_eq!(event["new_state"], "idle");

    // Other sessions are served while a stop is classifying.
    register(&daemon, "s2");
    let handle = {
        let socket = daemon.socket.clone();
        std::thread::spawn(move || {
            Client::connect(&socket)
                .request(json!({"cmd":"stop","id":"s1","message":"Anything else?"}))
        })
    };
    std::thread::sleep(Duration::from_millis(100));
    let quick = Instant::now();
    assert!(daemon
        .request(json!({"cmd":"state","id":"s2","state":"idle"}))
        .ok);
    assert!(quick.elapsed() < Duration::from_millis(900));
    assert!(handle.join().unwrap().ok);
}
