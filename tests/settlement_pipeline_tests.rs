mod utils;
use utils::{board, TestSetupBuilder};

use settlement::{
    queue::{TaskKind, TaskQueue},
    settlement::total_score,
    store::{Datastore, EntityKey},
};

fn three_player_setup() -> TestSetupBuilder {
    TestSetupBuilder::new().with_members(
        "g1",
        &[("alice", "Austria"), ("bob", "England"), ("carol", "France")],
    )
}

#[tokio::test]
async fn settled_game_gets_rated_and_stats_follow() {
    let setup = three_player_setup().build().await;

    let result = setup
        .pipeline
        .settlement
        .settle(
            "g1",
            &board(
                &[("vie", "Austria"), ("bud", "Austria"), ("tri", "Austria"), ("lon", "England")],
                None,
            ),
        )
        .await
        .expect("settling should succeed");
    assert!((total_score(&result.scores) - 100.0).abs() < 1e-9);
    assert_eq!(result.eliminated_users, vec!["carol"]);

    setup.drain().await;

    let stored = setup
        .store
        .get_game_result("g1")
        .await
        .unwrap()
        .expect("result should be stored");
    assert!(stored.value.rated, "result should be rated after the queue drains");

    let snapshots = setup.store.rating_snapshots().await;
    assert_eq!(snapshots.len(), 3, "one snapshot per member");
    let rating_of = |user: &str| {
        snapshots
            .iter()
            .find(|s| s.user_id == user)
            .map(|s| s.rating)
            .expect("member should have a snapshot")
    };
    assert!(rating_of("alice") > rating_of("bob"));
    assert!(rating_of("bob") > rating_of("carol"));

    for user in ["alice", "bob", "carol"] {
        let stats = setup
            .store
            .get_user_stats(user)
            .await
            .unwrap()
            .expect("stats should be computed for every member");
        assert_eq!(stats.public.finished_games, 1);
        assert_eq!(stats.rating.game_id, "g1", "stats should carry the new rating");
    }
    let carol = setup.store.get_user_stats("carol").await.unwrap().unwrap();
    assert_eq!(carol.public.eliminated_games, 1);
    assert_eq!(carol.public.dias_games, 0);

    assert!(setup.queue.snapshot().await.is_empty());
    assert!(setup.queue.dead_letters().await.is_empty());
}

#[tokio::test]
async fn settling_twice_rates_once() {
    let setup = three_player_setup().build().await;
    let outcome = board(&[("vie", "Austria"), ("lon", "England"), ("par", "France")], None);

    let first = setup.pipeline.settlement.settle("g1", &outcome).await.unwrap();
    let second = setup.pipeline.settlement.settle("g1", &outcome).await.unwrap();
    assert_eq!(first, second);

    setup.drain().await;

    assert_eq!(setup.store.rating_snapshots().await.len(), 3);
    // settle + one rate commit
    assert_eq!(
        setup
            .store
            .version_of(&EntityKey::GameResult("g1".to_string()))
            .await,
        2
    );
}

#[tokio::test]
async fn every_unrated_result_is_reached_by_the_scan_chain() {
    let setup = TestSetupBuilder::new()
        .with_members("g1", &[("alice", "Austria"), ("bob", "England")])
        .with_members("g2", &[("alice", "Austria"), ("carol", "France")])
        .with_members("g3", &[("bob", "England"), ("carol", "France")])
        .build()
        .await;

    for game_id in ["g1", "g2", "g3"] {
        let nations: Vec<String> = setup
            .store
            .get_game(game_id)
            .await
            .unwrap()
            .unwrap()
            .value
            .members
            .iter()
            .map(|m| m.nation.clone())
            .collect();
        let outcome = board(&[("a", nations[0].as_str()), ("b", nations[1].as_str())], None);
        setup.pipeline.settlement.settle(game_id, &outcome).await.unwrap();
    }

    setup.drain().await;

    for game_id in ["g1", "g2", "g3"] {
        let result = setup.store.get_game_result(game_id).await.unwrap().unwrap();
        assert!(result.value.rated, "{game_id} should be rated");
    }
    assert_eq!(setup.store.rating_snapshots().await.len(), 6);
    assert!(setup.queue.dead_letters().await.is_empty());
}

#[tokio::test]
async fn transient_commit_failures_are_retried_to_completion() {
    let setup = three_player_setup().build().await;
    setup
        .pipeline
        .settlement
        .settle("g1", &board(&[("vie", "Austria"), ("lon", "England")], None))
        .await
        .unwrap();

    setup.store.fail_next_commits(2);
    setup.drain().await;

    let result = setup.store.get_game_result("g1").await.unwrap().unwrap();
    assert!(result.value.rated);
    for user in ["alice", "bob", "carol"] {
        assert!(setup.store.get_user_stats(user).await.unwrap().is_some(), "{user}");
    }
    assert!(setup.queue.dead_letters().await.is_empty());
}

#[tokio::test]
async fn work_dead_lettered_by_a_long_outage_completes_once_requeued() {
    let setup = three_player_setup().build().await;
    setup
        .pipeline
        .settlement
        .settle("g1", &board(&[("vie", "Austria"), ("lon", "England")], None))
        .await
        .unwrap();

    // Outlasts every attempt of the queued tasks
    setup.store.fail_next_commits(1_000);
    setup.drain().await;
    assert!(!setup.queue.dead_letters().await.is_empty());
    assert!(!setup.store.get_game_result("g1").await.unwrap().unwrap().value.rated);

    setup.store.fail_next_commits(0);
    let requeued = setup.queue.requeue_dead_letters().await.unwrap();
    assert!(requeued > 0);
    setup.drain().await;

    assert!(setup.queue.dead_letters().await.is_empty());
    assert!(setup.store.get_game_result("g1").await.unwrap().unwrap().value.rated);
    assert_eq!(setup.store.rating_snapshots().await.len(), 3);
    for user in ["alice", "bob", "carol"] {
        assert!(setup.store.get_user_stats(user).await.unwrap().is_some(), "{user}");
    }
}

#[tokio::test]
async fn inconsistent_result_is_dead_lettered_not_retried() {
    let setup = three_player_setup().build().await;
    setup
        .pipeline
        .settlement
        .settle("g1", &board(&[("vie", "Austria")], None))
        .await
        .unwrap();

    // A member leaving after settlement leaves a score without a member
    let mut game = setup.store.get_game("g1").await.unwrap().unwrap().value;
    game.members.pop();
    let mut tx = settlement::Transaction::new();
    tx.put_game(game);
    setup.commit(tx).await;

    setup.drain().await;

    let dead = setup.queue.dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].task.kind, TaskKind::UpdateRatings);
    assert_eq!(dead[0].task.attempt, 0, "invariant violations are not retried");
    assert!(setup.store.rating_snapshots().await.is_empty());
    let result = setup.store.get_game_result("g1").await.unwrap().unwrap().value;
    assert!(result.unratable.is_some(), "the scan moves past the broken result");
}

#[tokio::test]
async fn private_games_get_stats_but_no_rating() {
    let mut game = settlement::game::Game::new(
        "g1",
        "Private game",
        vec![
            settlement::game::Member::new("alice", "Austria"),
            settlement::game::Member::new("bob", "England"),
        ],
    );
    game.private = true;
    let setup = TestSetupBuilder::new().with_game(game).build().await;

    setup
        .pipeline
        .settlement
        .settle("g1", &board(&[("vie", "Austria"), ("lon", "England")], None))
        .await
        .unwrap();
    setup.drain().await;

    let result = setup.store.get_game_result("g1").await.unwrap().unwrap();
    assert!(!result.value.rated);
    assert!(setup.store.rating_snapshots().await.is_empty());

    let alice = setup.store.get_user_stats("alice").await.unwrap().unwrap();
    assert_eq!(alice.private.finished_games, 1);
    assert_eq!(alice.public.finished_games, 0);
    assert!(alice.rating.is_default());
}

#[tokio::test]
async fn rerate_rebuilds_the_same_ratings() {
    let setup = TestSetupBuilder::new()
        .with_members("g1", &[("alice", "Austria"), ("bob", "England")])
        .with_members("g2", &[("alice", "Austria"), ("bob", "England")])
        .build()
        .await;
    for game_id in ["g1", "g2"] {
        setup
            .pipeline
            .settlement
            .settle(game_id, &board(&[("vie", "Austria"), ("bud", "Austria"), ("lon", "England")], None))
            .await
            .unwrap();
        setup.drain().await;
    }
    let before = setup.store.rating_snapshots().await;
    assert_eq!(before.len(), 4);

    let deleted = setup.pipeline.updater.start_rerate().await.unwrap();
    assert_eq!(deleted, 4);
    setup.drain().await;

    let after = setup.store.rating_snapshots().await;
    assert_eq!(after.len(), 4);
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.user_id, new.user_id);
        assert_eq!(old.game_id, new.game_id);
        assert!((old.rating - new.rating).abs() < 1e-9);
    }
}

#[tokio::test]
async fn bans_show_up_in_stats() {
    let setup = three_player_setup()
        .with_ban("alice", "bob")
        .build()
        .await;

    setup.pipeline.stats.schedule(vec!["alice".into(), "bob".into()]).await.unwrap();
    setup.drain().await;

    let alice = setup.store.get_user_stats("alice").await.unwrap().unwrap();
    let bob = setup.store.get_user_stats("bob").await.unwrap().unwrap();
    assert_eq!(alice.public.owned_bans, 1);
    assert_eq!(bob.public.owned_bans, 0);
    assert_eq!(bob.public.shared_bans, 1);
    assert!(bob.public.hated > 0.0);
    assert!(alice.public.hater > 0.0);
}
