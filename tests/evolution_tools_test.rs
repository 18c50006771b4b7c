//! Strategy evolution and lifecycle tools over the tool surface.

mod common;

use serde_json::json;

use common::harness;

#[tokio::test]
async fn test_goal_rewrite_archives_web_tree_for_mobile() {
    let h = harness();
    h.call_ok(
        "create_project_forest",
        json!({"goal": "full stack web development"}),
    )
    .await;
    let project_id = h.projects.active_project_id().await.unwrap().unwrap();

    // Build directly (no onboarding): answer level 1, let the branch
    // ladder fall back.
    let build = h.call("build_hta_tree_forest", json!({}));
    let answer = h.respond_next(json!({
        "goal_analysis": {"goal_complexity": 6, "complexity_factors": ["stack breadth"]},
        "learning_approach": {"recommended_strategy": "project-driven"},
        "domain_boundaries": ["frontend", "backend", "deployment"],
    }));
    let (built, ()) = tokio::join!(build, answer);
    let built = built.unwrap();
    let tree_summary = built
        .get("result")
        .map_or(&built, |inner| inner)
        .clone();
    assert_eq!(tree_summary["built"], true);

    let before = h.hta_store.load(&project_id, "general").await.unwrap().unwrap();
    let old_frontier = before.frontier_nodes.len();

    let evolved = h
        .call_ok(
            "evolve_strategy_forest",
            json!({"hint": "I want to focus on mobile development instead of web"}),
        )
        .await;
    assert_eq!(evolved["evolution"]["type"], "goal_rewrite");
    assert_eq!(evolved["evolution"]["new_goal"], "mobile development");
    assert_eq!(
        evolved["evolution"]["archived_frontier_count"],
        old_frontier
    );

    let after = h.hta_store.load(&project_id, "general").await.unwrap().unwrap();
    assert_eq!(after.goal, "mobile development");
    assert!(!after.frontier_nodes.is_empty());
    assert_eq!(after.archived_trees.len(), 1);
    assert_eq!(after.archived_trees[0].tree.goal, "full stack web development");
    assert!(
        after
            .strategic_branches
            .iter()
            .all(|b| b.name.contains("Mobile Development")),
        "branches should reference the new goal: {:?}",
        after.branch_names()
    );
    after.validate().unwrap();
}

#[tokio::test]
async fn test_breakthrough_on_last_branch_task_prepends_advanced_work() {
    let h = harness();
    let project_id = h.onboard_photography_project().await;

    // Complete every task in one branch but the last, straight through the
    // store to keep the test focused on the tool behavior at the end.
    let mut tree = h.hta_store.load(&project_id, "general").await.unwrap().unwrap();
    let branch = tree.strategic_branches[0].name.clone();
    let ids: Vec<String> = tree
        .frontier_nodes
        .iter()
        .filter(|n| n.branch == branch)
        .map(|n| n.id.clone())
        .collect();
    for id in &ids[..ids.len() - 1] {
        tree.retire(id);
    }
    h.hta_store.save(&project_id, "general", &tree).await.unwrap();

    let last = ids.last().unwrap().clone();
    let completed = h
        .call_ok(
            "complete_block_forest",
            json!({
                "block_id": last,
                "outcome": "a real breakthrough",
                "energy_level": 5,
                "learned": "sudden insight into rim lighting",
                "difficulty_rating": 5,
                "breakthrough": true,
            }),
        )
        .await;
    assert!(completed["breakthrough_level"].as_u64().unwrap() >= 4);
    assert_eq!(completed["event"]["type"], "breakthrough");

    let updated = h.hta_store.load(&project_id, "general").await.unwrap().unwrap();
    updated.validate().unwrap();
    assert!(
        updated
            .frontier_nodes
            .iter()
            .any(|n| n.branch == branch && n.title.starts_with("Advanced")),
        "no advanced task prepended to {branch}"
    );
}

#[tokio::test]
async fn test_uncertainty_hint_roundtrip_through_tools() {
    let h = harness();
    h.onboard_photography_project().await;

    let evolved = h
        .call_ok(
            "evolve_strategy_forest",
            json!({"hint": "honestly I'm pretty confused about all of this"}),
        )
        .await;
    assert_eq!(evolved["evolution"]["type"], "uncertainty_expansion");
    assert_eq!(evolved["evolution"]["difficulty_delta"], -1);

    let status = h.call_ok("get_hta_status_forest", json!({})).await;
    assert_eq!(status["exists"], true);
}

#[tokio::test]
async fn test_evolve_pipeline_refreshes_window() {
    let h = harness();
    h.onboard_photography_project().await;

    let result = h
        .call_ok(
            "evolve_pipeline_forest",
            json!({"energy_level": 3, "time_available": 45}),
        )
        .await;
    assert!(result["count"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_factory_reset_all_leaves_nothing_listed() {
    let h = harness();
    h.call_ok("create_project_forest", json!({"goal": "goal one"})).await;
    h.call_ok("create_project_forest", json!({"goal": "goal two"})).await;

    // A too-short confirmation is refused.
    let err = h
        .call(
            "factory_reset_forest",
            json!({"confirm_deletion": true, "confirmation_message": "short"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.tag(), "ValidationError");

    h.call_ok(
        "factory_reset_forest",
        json!({
            "confirm_deletion": true,
            "confirmation_message": "yes, delete every project",
        }),
    )
    .await;

    let listed = h.call_ok("list_projects_forest", json!({})).await;
    assert_eq!(listed["count"], 0);

    let err = h
        .call("get_next_task_forest", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.tag(), "NoActiveProject");
}

#[tokio::test]
async fn test_factory_reset_single_project() {
    let h = harness();
    h.call_ok("create_project_forest", json!({"goal": "goal one"})).await;
    let first = h.projects.active_project_id().await.unwrap().unwrap();
    h.call_ok("create_project_forest", json!({"goal": "goal two"})).await;

    h.call_ok(
        "factory_reset_forest",
        json!({
            "confirm_deletion": true,
            "confirmation_message": "remove just the first one",
            "project_id": first,
        }),
    )
    .await;

    let listed = h.call_ok("list_projects_forest", json!({})).await;
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["projects"][0]["goal"], "goal two");
}
