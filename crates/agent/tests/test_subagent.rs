//! Subagent coordinator: launch, chat, blocking questions

mod common;

use common::*;
use kestrel_agent::subagent::{RunResult, SubagentPhase};
use kestrel_agent::tools::{AskMainAgentTool, SubagentTool};
use kestrel_agent::{
    AgentError, AgentProfile, QuestionBridge, SubagentCoordinator, TaskRegistry, TaskStatus, Tool,
    ToolRegistry,
};
use kestrel_bus::{InboundReceiver, MessageBus};
use kestrel_provider::{ChatParams, ChatResponse, Message, Provider};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn registry() -> ToolRegistry {
    let (mut registry, _) = routed_registry();
    registry.register(SubagentTool::new());
    registry.register_internal(AskMainAgentTool);
    registry
}

fn setup(
    provider: Arc<dyn Provider>,
    registry: ToolRegistry,
    max_iterations: usize,
) -> (Arc<SubagentCoordinator>, InboundReceiver) {
    let engine = engine(provider, registry).with_max_iterations(max_iterations);
    let (bus, in_rx, _out_rx) = MessageBus::channels();
    let coordinator = SubagentCoordinator::new(
        engine,
        Arc::new(TaskRegistry::new()),
        Arc::new(QuestionBridge::new()),
    )
    .with_inbound(bus.inbound_sender());
    (Arc::new(coordinator), in_rx)
}

/// Subagent sessions start with their profile prompt; the main test session has none
fn is_subagent(params: &ChatParams) -> bool {
    matches!(params.messages.first(), Some(Message::System { .. }))
}

/// Subagent asks one question, then reports the answer it got
fn asking_subagent(params: &ChatParams) -> ChatResponse {
    match params.messages.last() {
        Some(Message::Tool { name, content, .. }) if name.as_deref() == Some("ask_main_agent") => {
            ChatResponse::text(format!("Report (answer: {})", content))
        }
        _ => tool_turn(vec![call(
            "q1",
            "ask_main_agent",
            json!({"question": "Include prices?"}),
        )]),
    }
}

async fn wait_until<F: Fn() -> bool>(check: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_launch_completes_and_announces() {
    let provider = Arc::new(ScriptedProvider::new(vec![ChatResponse::text("research done")]));
    let (coordinator, mut in_rx) = setup(provider, registry(), 5);
    let caller = ctx("telegram:42").with_coordinator(coordinator.clone());

    let receipt = coordinator
        .launch("researcher", "look into it", &caller)
        .await
        .unwrap();
    assert_eq!(receipt.status, "started");
    assert_eq!(receipt.agent_type, "researcher");
    assert_eq!(receipt.subagent_id.len(), 8);

    let note = in_rx.recv().await.unwrap();
    assert_eq!(note.sender_id, format!("subagent:{}", receipt.subagent_id));
    assert_eq!(note.session_key(), "telegram:42");
    assert!(note.content.contains("research done"));

    let task = coordinator.status(&receipt.subagent_id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result.as_deref(), Some("research done"));
    assert_eq!(task.caller_session_id, "telegram:42");
    assert!(task.completed_at.is_some());
}

#[tokio::test]
async fn test_blocking_question_answered_through_chat() {
    let provider = Arc::new(FnProvider(asking_subagent));
    let (coordinator, mut in_rx) = setup(provider, registry(), 5);
    let caller = ctx("cli:direct").with_coordinator(coordinator.clone());

    let id = coordinator
        .launch("researcher", "compare laptops", &caller)
        .await
        .unwrap()
        .subagent_id;

    let phase = coordinator.wait_idle(&id).await.unwrap();
    assert_eq!(
        phase,
        SubagentPhase::AwaitingAnswer("Include prices?".to_string())
    );
    assert_eq!(coordinator.status(&id).unwrap().status, TaskStatus::Running);

    let note = in_rx.recv().await.unwrap();
    assert!(note.content.contains("Include prices?"));
    assert_eq!(note.session_key(), "cli:direct");

    let reply = coordinator.chat(&id, "yes").await.unwrap();
    assert_eq!(reply.status, TaskStatus::Completed);
    assert_eq!(reply.response.as_deref(), Some("Report (answer: yes)"));
    assert!(!reply.timed_out);
    assert!(reply.question.is_none());

    assert_eq!(coordinator.status(&id).unwrap().status, TaskStatus::Completed);
    // Results of a chat-resumed run go back through chat only
    assert!(in_rx.try_recv().is_err());

    let session_id = coordinator.status(&id).unwrap().session_id;
    assert_eq!(session_id, format!("subagent:{}", id));
    let session = coordinator.engine().sessions().messages(&session_id).await;
    assert_eq!(session.len(), 5);
    assert_tool_pairing(&session);
}

#[tokio::test]
async fn test_subagent_tools_are_restricted() {
    let mut registry = registry();
    let (send, _) = EchoTool::new("send_message");
    registry.register_in("web", send);

    let provider = Arc::new(ScriptedProvider::new(vec![ChatResponse::text("ok")]));
    let engine = engine(provider.clone(), registry);
    let coordinator = Arc::new(SubagentCoordinator::new(
        engine,
        Arc::new(TaskRegistry::new()),
        Arc::new(QuestionBridge::new()),
    ));

    let mut names: Vec<_> = coordinator
        .subagent_tools(&AgentProfile::researcher())
        .into_iter()
        .map(|d| d.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["ask_main_agent", "web_fetch", "web_search"]);

    let caller = ctx("cli:direct").with_coordinator(coordinator.clone());
    let id = coordinator
        .launch("coder", "fix it", &caller)
        .await
        .unwrap()
        .subagent_id;
    coordinator.wait_idle(&id).await.unwrap();

    let offered = provider.tool_names(0);
    assert!(offered.contains(&"exec".to_string()));
    assert!(offered.contains(&"ask_main_agent".to_string()));
    assert!(!offered.contains(&"subagent".to_string()));
    assert!(!offered.contains(&"send_message".to_string()));
    assert!(!offered.contains(&"route_to_category".to_string()));
}

#[tokio::test]
async fn test_custom_denylist_keeps_outbound_tool_out() {
    let mut registry = registry();
    let (send, _) = EchoTool::new("send_message");
    registry.register_in("web", send);

    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let coordinator = SubagentCoordinator::new(
        engine(provider, registry),
        Arc::new(TaskRegistry::new()),
        Arc::new(QuestionBridge::new()),
    )
    .with_denylist(vec!["web_fetch".to_string()]);

    let names: Vec<_> = coordinator
        .subagent_tools(&AgentProfile::researcher())
        .into_iter()
        .map(|d| d.name)
        .collect();
    assert!(!names.contains(&"send_message".to_string()));
    assert!(!names.contains(&"web_fetch".to_string()));
    assert!(names.contains(&"web_search".to_string()));
}

#[tokio::test]
async fn test_ask_outside_subagent_fails_fast() {
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let (coordinator, _in_rx) = setup(provider, registry(), 5);

    let err = coordinator
        .ask_main_agent(&ctx("cli:direct"), "anyone?")
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::NotInSubagentContext));
    assert!(coordinator.bridge().pending_all().is_empty());
}

#[tokio::test]
async fn test_unknown_ids_and_types() {
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let (coordinator, _in_rx) = setup(provider, registry(), 5);
    let caller = ctx("cli:direct").with_coordinator(coordinator.clone());

    assert!(matches!(
        coordinator.chat("missing", "hello").await,
        Err(AgentError::UnknownSubagent(_))
    ));
    assert!(matches!(
        coordinator.launch("wizard", "magic", &caller).await,
        Err(AgentError::UnknownAgentType(_))
    ));
    assert!(coordinator.status("missing").is_none());
}

#[tokio::test]
async fn test_chat_resumes_finished_subagent() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        ChatResponse::text("first answer"),
        ChatResponse::text("second answer"),
    ]));
    let (coordinator, _in_rx) = setup(provider.clone(), registry(), 5);
    let caller = ctx("cli:direct").with_coordinator(coordinator.clone());

    let id = coordinator
        .launch("general", "start", &caller)
        .await
        .unwrap()
        .subagent_id;
    assert_eq!(
        coordinator.wait_idle(&id).await.unwrap(),
        SubagentPhase::Finished(RunResult::Completed(Some("first answer".to_string())))
    );

    let reply = coordinator.chat(&id, "more please").await.unwrap();
    assert_eq!(reply.response.as_deref(), Some("second answer"));
    assert_eq!(reply.status, TaskStatus::Completed);

    let history = &provider.requests()[1].messages;
    assert_eq!(history.last(), Some(&Message::user("more please")));
    assert_eq!(coordinator.list().len(), 1);
}

#[tokio::test]
async fn test_iteration_exhaustion_is_reported() {
    let provider = Arc::new(ScriptedProvider::repeating(tool_turn(vec![call(
        "c",
        "web_search",
        json!({}),
    )])));
    let (coordinator, mut in_rx) = setup(provider, registry(), 2);
    let caller = ctx("cli:direct").with_coordinator(coordinator.clone());

    let id = coordinator
        .launch("researcher", "never ends", &caller)
        .await
        .unwrap()
        .subagent_id;

    assert_eq!(
        coordinator.wait_idle(&id).await.unwrap(),
        SubagentPhase::Finished(RunResult::TimedOut)
    );
    let task = coordinator.status(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.unwrap().contains("timed out"));
    assert!(in_rx.recv().await.unwrap().content.contains("iteration limit"));

    let reply = coordinator.chat(&id, "try again").await.unwrap();
    assert!(reply.timed_out);
    assert_eq!(reply.status, TaskStatus::Failed);
}

#[tokio::test]
async fn test_two_questions_in_one_turn() {
    let provider = Arc::new(FnProvider(|params: &ChatParams| match params.messages.last() {
        Some(Message::Tool { .. }) => ChatResponse::text("done"),
        _ => tool_turn(vec![
            call("a", "ask_main_agent", json!({"question": "A?"})),
            call("b", "ask_main_agent", json!({"question": "B?"})),
        ]),
    }));
    let (coordinator, mut in_rx) = setup(provider, registry(), 5);
    let caller = ctx("cli:direct").with_coordinator(coordinator.clone());

    let id = coordinator
        .launch("general", "ask twice", &caller)
        .await
        .unwrap()
        .subagent_id;

    let phase = coordinator.wait_idle(&id).await.unwrap();
    let SubagentPhase::AwaitingAnswer(question) = phase else {
        panic!("expected a pending question, got {:?}", phase);
    };
    assert!(question == "A?" || question == "B?");

    // The refused question must not knock the subagent out of waiting
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        coordinator.phase(&id),
        Some(SubagentPhase::AwaitingAnswer(question.clone()))
    );
    assert_eq!(coordinator.bridge().pending(&id), Some(question.clone()));

    let note = in_rx.recv().await.unwrap();
    assert!(note.content.contains(&question));
    assert!(in_rx.try_recv().is_err());

    let reply = coordinator.chat(&id, "yes").await.unwrap();
    assert_eq!(reply.status, TaskStatus::Completed);
    assert_eq!(reply.response.as_deref(), Some("done"));

    let session_id = coordinator.status(&id).unwrap().session_id;
    let session = coordinator.engine().sessions().messages(&session_id).await;
    let tool_results: Vec<_> = session
        .iter()
        .filter_map(|m| match m {
            Message::Tool { content, .. } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(tool_results.len(), 2);
    assert!(tool_results.contains(&"yes"));
    assert!(tool_results
        .iter()
        .any(|c| c.contains("ask one question at a time")));
    assert_tool_pairing(&session);
}

#[tokio::test]
async fn test_question_timeout_keeps_task_running() {
    let provider = Arc::new(FnProvider(|params: &ChatParams| match params.messages.last() {
        Some(Message::Tool { content, .. }) => ChatResponse::text(format!("gave up: {}", content)),
        _ => tool_turn(vec![call("q", "ask_main_agent", json!({"question": "hello?"}))]),
    }));
    let engine = engine(provider, registry());
    let coordinator = Arc::new(
        SubagentCoordinator::new(
            engine,
            Arc::new(TaskRegistry::new()),
            Arc::new(QuestionBridge::new()),
        )
        .with_ask_timeout(Duration::from_millis(300)),
    );
    let caller = ctx("cli:direct").with_coordinator(coordinator.clone());

    let id = coordinator
        .launch("general", "ask me", &caller)
        .await
        .unwrap()
        .subagent_id;

    let phase = coordinator.wait_idle(&id).await.unwrap();
    assert!(matches!(phase, SubagentPhase::AwaitingAnswer(_)));
    assert_eq!(coordinator.status(&id).unwrap().status, TaskStatus::Running);

    let tasks = coordinator.tasks().clone();
    let task_id = id.clone();
    wait_until(move || {
        tasks
            .get(&task_id)
            .map(|t| t.status == TaskStatus::Completed)
            .unwrap_or(false)
    })
    .await;

    let result = coordinator.status(&id).unwrap().result.unwrap();
    assert!(result.starts_with("gave up: Error executing tool:"));
    assert!(result.contains("no answer from the main agent"));
    assert!(coordinator.bridge().pending(&id).is_none());
}

#[tokio::test]
async fn test_chat_while_running_is_busy() {
    let mut registry = registry();
    registry.register_in(
        "web",
        SlowTool {
            name: "slow",
            delay: Duration::from_millis(500),
        },
    );
    let provider = Arc::new(FnProvider(|params: &ChatParams| match params.messages.last() {
        Some(Message::Tool { .. }) => ChatResponse::text("done"),
        _ => tool_turn(vec![call("s", "slow", json!({}))]),
    }));
    let (coordinator, _in_rx) = setup(provider, registry, 5);
    let caller = ctx("cli:direct").with_coordinator(coordinator.clone());

    let id = coordinator
        .launch("researcher", "be slow", &caller)
        .await
        .unwrap()
        .subagent_id;

    assert!(matches!(
        coordinator.chat(&id, "are you done?").await,
        Err(AgentError::SubagentBusy(_))
    ));
    coordinator.wait_idle(&id).await.unwrap();
}

#[tokio::test]
async fn test_subagent_tool_refuses_inside_subagent() {
    let provider = Arc::new(ScriptedProvider::new(vec![]));
    let (coordinator, _in_rx) = setup(provider, registry(), 5);
    let main = ctx("cli:direct").with_coordinator(coordinator.clone());
    let inner = main.for_subagent("abcd1234", "subagent:abcd1234");

    let out = SubagentTool::new()
        .execute(json!({"action": "list"}), &inner)
        .await
        .unwrap();
    assert!(!out.success);
    assert!(coordinator.list().is_empty());

    let out = SubagentTool::new()
        .execute(json!({"action": "list"}), &main)
        .await
        .unwrap();
    assert!(out.success);

    let out = SubagentTool::new()
        .execute(json!({"action": "launch", "agent_type": "coder"}), &main)
        .await
        .unwrap();
    assert!(!out.success);
    assert!(out.error.unwrap().contains("prompt"));
}

/// Main agent launches a researcher, relays its question and gets the report
#[tokio::test]
async fn test_main_agent_answers_subagent_question() {
    let provider = Arc::new(FnProvider(|params: &ChatParams| {
        if is_subagent(params) {
            return asking_subagent(params);
        }
        match params.messages.last() {
            Some(Message::User { content }) if content.contains("asks:") => {
                let start = content.find("id ").map(|i| i + 3).unwrap_or(0);
                let id: String = content[start..].chars().take(8).collect();
                tool_turn(vec![call(
                    "m2",
                    "subagent",
                    json!({"action": "chat", "subagent_id": id, "prompt": "yes"}),
                )])
            }
            Some(Message::User { .. }) => tool_turn(vec![call(
                "m1",
                "subagent",
                json!({"action": "launch", "agent_type": "researcher", "prompt": "compare laptops"}),
            )]),
            Some(Message::Tool { content, .. }) if content.contains("\"completed\"") => {
                let reply: serde_json::Value = serde_json::from_str(content).unwrap();
                ChatResponse::text(format!("Relayed: {}", reply["response"].as_str().unwrap()))
            }
            _ => ChatResponse::text("Launched a researcher."),
        }
    }));
    let (coordinator, mut in_rx) = setup(provider, registry(), 5);
    let main_engine = coordinator.engine().clone();
    let main = ctx("cli:direct").with_coordinator(coordinator.clone());
    let base = main_engine.executor().registry().base_definitions();

    main_engine
        .sessions()
        .append("cli:direct", Message::user("compare laptops for me"))
        .await;
    let first = main_engine.run("cli:direct", &base, &main, None).await.unwrap();
    assert_eq!(first.response.as_deref(), Some("Launched a researcher."));

    let note = in_rx.recv().await.unwrap();
    main_engine
        .sessions()
        .append("cli:direct", Message::user(note.content))
        .await;
    let second = main_engine.run("cli:direct", &base, &main, None).await.unwrap();
    assert_eq!(
        second.response.as_deref(),
        Some("Relayed: Report (answer: yes)")
    );
    assert_tool_pairing(&main_engine.sessions().messages("cli:direct").await);
}
