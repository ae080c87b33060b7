mod common;

use serde_json::{Value, json};

use common::{FakeDriver, paginated_site};
use text_vision_agent::actions::ActionTable;
use text_vision_agent::session::BrowserSession;
use text_vision_agent::types::ToolOutput;

const PAGE1: &str = "https://shop.test/page1";
const PAGE2: &str = "https://shop.test/page2";

fn setup(driver: FakeDriver) -> (ActionTable, BrowserSession) {
    let actions = ActionTable::new(3000, std::env::temp_dir().join("text-vision-agent-tests"));
    (actions, BrowserSession::new(Box::new(driver)))
}

fn text(actions: &ActionTable, session: &mut BrowserSession, tool: &str, args: Value) -> String {
    match actions.execute(session, tool, &args) {
        ToolOutput::Text(text) => text,
        other => panic!("{tool} returned a signal: {other:?}"),
    }
}

#[test]
fn next_link_resolves_to_one_hit_and_click_follows_href() {
    let driver = FakeDriver::new(paginated_site(), PAGE1);
    let events = driver.events();
    let (actions, mut session) = setup(driver);

    let found = text(
        &actions,
        &mut session,
        "discover_element",
        json!({ "search_text": "Next", "element_type": "link" }),
    );
    assert!(found.starts_with("✅ Found 1 element:"), "{found}");
    assert!(found.contains(r#"[data-vision-discover="0"]"#), "{found}");
    assert!(found.contains("Tag: <a>"), "{found}");

    let clicked = text(
        &actions,
        &mut session,
        "click_element",
        json!({ "selector": r#"[data-vision-discover="0"]"#, "description": "Next page" }),
    );
    assert!(clicked.starts_with("✅ Navigated via link: Next page"), "{clicked}");
    assert!(clicked.contains(&format!("Current URL: {PAGE2}")), "{clicked}");
    assert_eq!(session.driver().url().unwrap(), PAGE2);

    let events = events.lock().unwrap();
    assert!(events.contains(&format!("navigate {PAGE2}")));
    assert!(!events.iter().any(|e| e.starts_with("click")), "{events:?}");
}

#[test]
fn selector_from_previous_page_is_stale() {
    let (actions, mut session) = setup(FakeDriver::new(paginated_site(), PAGE1));
    let selector = r#"[data-vision-discover="0"]"#;

    text(&actions, &mut session, "discover_element", json!({ "search_text": "kettle" }));
    text(&actions, &mut session, "navigate_url", json!({ "url": PAGE2 }));

    let out = text(
        &actions,
        &mut session,
        "click_element",
        json!({ "selector": selector, "description": "kettle" }),
    );
    assert!(out.starts_with("❌ Stale selector"), "{out}");

    // Coming back to the same URL does not revive the old slots.
    text(&actions, &mut session, "navigate_back", json!({}));
    assert_eq!(session.driver().url().unwrap(), PAGE1);
    let out = text(&actions, &mut session, "type_text", json!({ "selector": selector, "text": "x" }));
    assert!(out.starts_with("❌ Stale selector"), "{out}");
}

#[test]
fn failed_link_navigation_still_retires_selectors() {
    let driver = FakeDriver::new(paginated_site(), PAGE1).hang_on(PAGE2);
    let events = driver.events();
    let (actions, mut session) = setup(driver);
    let selector = r#"[data-vision-discover="0"]"#;

    text(
        &actions,
        &mut session,
        "discover_element",
        json!({ "search_text": "Next", "element_type": "link" }),
    );
    let out = text(
        &actions,
        &mut session,
        "click_element",
        json!({ "selector": selector, "description": "Next page" }),
    );
    assert!(!out.starts_with("✅"), "{out}");
    assert!(out.contains("timed out"), "{out}");
    assert!(events.lock().unwrap().contains(&format!("navigate {PAGE2}")));
    assert_eq!(session.driver().url().unwrap(), PAGE1);

    let out = text(
        &actions,
        &mut session,
        "hover_element",
        json!({ "selector": selector, "description": "Next page" }),
    );
    assert!(out.starts_with("❌ Stale selector"), "{out}");
}

#[test]
fn discovery_misses_are_plain_results() {
    let (actions, mut session) = setup(FakeDriver::new(paginated_site(), PAGE1));

    let out = text(&actions, &mut session, "discover_element", json!({ "search_text": "Checkout" }));
    assert_eq!(out, "❌ No elements found with text 'Checkout'");

    let out = text(&actions, &mut session, "discover_element", json!({ "search_text": "  " }));
    assert!(out.starts_with("❌ No elements found"), "{out}");
}

#[test]
fn discovery_by_placeholder_finds_input() {
    let (actions, mut session) = setup(FakeDriver::new(paginated_site(), PAGE1));

    let out = text(
        &actions,
        &mut session,
        "discover_element",
        json!({ "search_text": "search products", "element_type": "input" }),
    );
    assert!(out.starts_with("✅ Found 1 element:"), "{out}");
    assert!(out.contains("Tag: <input>"), "{out}");

    let typed = text(
        &actions,
        &mut session,
        "type_text",
        json!({ "selector": r#"[data-vision-discover="0"]"#, "text": "kettle" }),
    );
    assert_eq!(typed, "✅ Typed into field: kettle");
}

#[test]
fn observe_page_renders_snapshot() {
    let (actions, mut session) = setup(FakeDriver::new(paginated_site(), PAGE1));

    let out = text(&actions, &mut session, "observe_page", json!({}));
    assert!(out.starts_with("📄 Current Page State:"), "{out}");
    assert!(out.contains("=== PAGE SNAPSHOT ==="));
    assert!(out.contains(&format!("URL: {PAGE1}")));
    assert!(out.contains("Title: Results - Page 1"));
    assert!(out.contains("=== INTERACTIVE ELEMENTS ==="));
    assert!(!out.contains("Open Tabs"));
}

#[test]
fn links_can_be_filtered_by_text() {
    let (actions, mut session) = setup(FakeDriver::new(paginated_site(), PAGE2));

    let out = text(&actions, &mut session, "extract_links", json!({ "filter_text": "prev" }));
    assert!(out.starts_with("🔗 Found 1 link(s):"), "{out}");
    assert!(out.contains("Previous"));

    let out = text(&actions, &mut session, "extract_links", json!({ "filter_text": "zzz" }));
    assert_eq!(out, "❌ No links found containing 'zzz'");
}

#[test]
fn closing_the_only_tab_is_rejected() {
    let (actions, mut session) = setup(FakeDriver::new(paginated_site(), PAGE1));

    let out = text(&actions, &mut session, "close_tab", json!({ "tab_index": 0 }));
    assert!(out.starts_with("❌"), "{out}");
    assert!(out.contains("only tab"), "{out}");
    assert_eq!(session.driver().tabs().unwrap().len(), 1);
}

#[test]
fn closing_the_active_tab_leaves_one_active_tab() {
    let driver = FakeDriver::new(paginated_site(), PAGE1).with_tabs(&[PAGE2, PAGE1]);
    let (actions, mut session) = setup(driver);

    let out = text(&actions, &mut session, "close_tab", json!({ "tab_index": 0 }));
    assert!(out.starts_with("✅ Closed tab 0: Results - Page 1"), "{out}");
    assert!(out.contains("Active tab: 0. Results - Page 2"), "{out}");

    let tabs = session.driver().tabs().unwrap();
    assert_eq!(tabs.len(), 2);
    assert_eq!(tabs.iter().filter(|t| t.active).count(), 1);
    assert_eq!(session.driver().url().unwrap(), PAGE2);

    let out = text(&actions, &mut session, "close_tab", json!({ "tab_index": 5 }));
    assert!(out.contains("invalid tab index: 5"), "{out}");
}

#[test]
fn switching_tabs_reports_target() {
    let driver = FakeDriver::new(paginated_site(), PAGE1).with_tabs(&[PAGE2]);
    let (actions, mut session) = setup(driver);

    let listed = text(&actions, &mut session, "list_tabs", json!({}));
    assert!(listed.starts_with("📑 Found 2 open tab(s):"), "{listed}");
    assert!(listed.contains("[ACTIVE]"));

    let out = text(&actions, &mut session, "switch_tab", json!({ "tab_index": 1 }));
    assert!(out.starts_with("✅ Switched to tab 1:"), "{out}");
    assert!(out.contains(PAGE2));
}

#[test]
fn waiting_for_a_missing_element_times_out() {
    let (actions, mut session) = setup(FakeDriver::new(paginated_site(), PAGE1));

    let out = text(
        &actions,
        &mut session,
        "wait_for_element",
        json!({ "selector": "#nope", "timeout": 50 }),
    );
    assert!(out.starts_with("⏱️ Timeout"), "{out}");

    let out = text(&actions, &mut session, "wait_for_element", json!({ "selector": "#q" }));
    assert_eq!(out, "✅ Element appeared: #q");
}

#[test]
fn waiting_on_attached_and_hidden_states() {
    let mut pages = paginated_site();
    let spinner = pages[0].el(Some(0), "div", "Loading");
    pages[0].set_id(spinner, "spinner");
    pages[0].hide(spinner);
    let (actions, mut session) = setup(FakeDriver::new(pages, PAGE1));

    let wait = |actions: &ActionTable, session: &mut BrowserSession, state: &str| {
        text(
            actions,
            session,
            "wait_for_element",
            json!({ "selector": "#spinner", "timeout": 50, "state": state }),
        )
    };
    assert_eq!(wait(&actions, &mut session, "hidden"), "✅ Element gone: #spinner");
    assert_eq!(wait(&actions, &mut session, "attached"), "✅ Element attached: #spinner");
    let out = wait(&actions, &mut session, "visible");
    assert!(out.starts_with("⏱️ Timeout"), "{out}");

    let out = text(
        &actions,
        &mut session,
        "wait_for_element",
        json!({ "selector": "#q", "timeout": 50, "state": "hidden" }),
    );
    assert!(out.starts_with("⏱️ Timeout"), "{out}");
}

#[test]
fn bad_calls_become_failure_text() {
    let (actions, mut session) = setup(FakeDriver::new(paginated_site(), PAGE1));

    let out = text(&actions, &mut session, "fly_to_moon", json!({}));
    assert_eq!(out, "❌ Unknown tool: fly_to_moon");

    let out = text(&actions, &mut session, "navigate_url", json!({}));
    assert!(out.starts_with("❌"), "{out}");
    assert!(out.contains("navigate_url"), "{out}");
}

#[test]
fn signal_tools_are_typed() {
    let (actions, mut session) = setup(FakeDriver::new(paginated_site(), PAGE1));

    let out = actions.execute(
        &mut session,
        "request_human_help",
        &json!({ "description": "Solve the CAPTCHA" }),
    );
    assert_eq!(
        out,
        ToolOutput::HumanHelp {
            description: "Solve the CAPTCHA".into()
        }
    );
    assert_eq!(out.to_string(), "🚨 HUMAN_HELP_NEEDED: Solve the CAPTCHA");

    let out = actions.execute(&mut session, "task_complete", &json!({ "summary": "done" }));
    assert_eq!(out, ToolOutput::Complete { summary: "done".into() });
}
