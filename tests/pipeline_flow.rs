use std::sync::Arc;

use pipegraph_core::config::{AppConfig, Environment};
use pipegraph_core::error::PipelineError;
use pipegraph_core::event::EventBus;
use pipegraph_graph::{project, project_legacy, Signal};
use pipegraph_store::{ActivationManager, Advance, PipelineEngine};
use pipegraph_test_utils::{FixtureEnv, REVIEW_GRAPH};

fn build(env: &Environment) -> (PipelineEngine, ActivationManager) {
    let engine = PipelineEngine::new(env, Arc::new(EventBus::default()));
    let activation = ActivationManager::new(&engine);
    (engine, activation)
}

#[tokio::test]
async fn activate_then_walk_review_pipeline() {
    let fixture = FixtureEnv::hub();
    fixture.add_catalog_graph("review-graph.yaml", REVIEW_GRAPH);
    fixture.add_agent("reviewer");
    fixture.write_hub_config();

    // Resolve the hub the way the binary does, from the home directory.
    let env = Environment::resolve(&AppConfig::default(), fixture.home.clone());
    let (engine, activation) = build(&env);

    let report = activation.activate(&fixture.project, "review").await.unwrap();
    assert_eq!(report.start_node, "plan");
    assert_eq!(
        std::fs::read(&report.definition).unwrap(),
        REVIEW_GRAPH.as_bytes()
    );
    let state_file = fixture
        .hub_dir
        .join(".pipegraph/states/demo/graph_state.json");
    assert!(state_file.exists());

    let status = engine.status(&fixture.project).await.unwrap();
    assert_eq!(status.graph_name, "review");
    assert_eq!(status.current.as_ref().unwrap().id, "plan");

    let outcome = engine
        .fire_signal(&fixture.project, &Signal::text("Plan approved"), None)
        .await
        .unwrap();
    assert!(matches!(outcome, Advance::Moved(_)));

    engine
        .traverse_edge(&fixture.project, "implement-review", "pr opened")
        .await
        .unwrap();

    for _ in 0..2 {
        engine
            .traverse_edge(&fixture.project, "review-implement", "changes requested")
            .await
            .unwrap();
        engine
            .traverse_edge(&fixture.project, "implement-review", "pr updated")
            .await
            .unwrap();
    }

    // implement has max_visits 3 and has been visited three times
    let err = engine
        .traverse_edge(&fixture.project, "review-implement", "again")
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::VisitCapReached { visits: 3, max: 3, .. }));

    let outcome = engine.advance(&fixture.project).await.unwrap();
    assert!(matches!(outcome, Advance::Stayed { .. }));

    let graph = engine.store().load_graph(&fixture.project).await.unwrap();
    let state = engine.store().load_state(&fixture.project).await;
    assert_eq!(state.current_node(), Some("review"));
    assert_eq!(state.total_transitions, 6);

    let legacy = project_legacy(&graph, &state);
    assert_eq!(legacy.current_step, Some(2));
    assert_eq!(legacy.total_steps, 3);

    let diagram = project(&graph, &state);
    assert!(diagram.text.starts_with("flowchart TD\n"));
    assert!(diagram.text.contains("style review "));

    let reset = engine.reset(&fixture.project).await.unwrap();
    assert_eq!(reset.state.current_node(), Some("plan"));
    assert_eq!(reset.state.active_graph.as_deref(), Some("review"));
    assert_eq!(reset.state.total_transitions, 0);
}

#[tokio::test]
async fn hub_state_is_keyed_by_directory_name() {
    let fixture = FixtureEnv::hub();
    fixture.add_catalog_graph("review-graph.yaml", REVIEW_GRAPH);
    let (engine, activation) = build(&fixture.env);

    activation.activate(&fixture.project, "review").await.unwrap();

    let project_state = fixture.project.join(".claude/pipeline/graph_state.json");
    assert!(!project_state.exists());
    let hub_state = engine.store().scope().state_file(&fixture.project);
    assert!(hub_state.starts_with(&fixture.hub_dir));
}
