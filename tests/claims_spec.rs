use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use rocket_warden::bulletin::MemoryBulletin;
use rocket_warden::clock::{Clock, ManualClock};
use rocket_warden::collaborators::{IgnoreList, StaticContracts};
use rocket_warden::config::WardenConfig;
use rocket_warden::db::Database;
use rocket_warden::evidence::DbArtifactStore;
use rocket_warden::models::*;
use rocket_warden::{Collaborators, Warden, WardenError};
use speculate2::speculate;
use uuid::Uuid;

struct Harness {
    warden: Warden,
    bulletin: MemoryBulletin,
    clock: ManualClock,
}

fn harness(config: WardenConfig) -> Harness {
    let db = Database::open_memory().expect("Failed to create in-memory database");
    db.migrate().expect("Failed to run migrations");

    let bulletin = MemoryBulletin::new();
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap());
    let collaborators = Collaborators {
        agents: Arc::new(IgnoreList::new(config.ignored_agents.clone())),
        contracts: Arc::new(StaticContracts::new()),
        store: Arc::new(DbArtifactStore::new(db.clone(), Arc::new(clock.clone()))),
        bulletin: Arc::new(bulletin.clone()),
        clock: Arc::new(clock.clone()),
    };

    Harness {
        warden: Warden::new(db, config, collaborators),
        bulletin,
        clock,
    }
}

fn lenient() -> WardenConfig {
    WardenConfig {
        mixed_claims_conflict: false,
        ..Default::default()
    }
}

fn start(warden: &Warden, project: &str, agent: &str) -> Session {
    warden
        .sessions()
        .start_session(StartSessionInput {
            project: project.to_string(),
            agent_name: agent.to_string(),
            intent_id: None,
        })
        .expect("Failed to start session")
}

fn claim(warden: &Warden, session: &Session, pattern: &str, claim_type: ClaimType) -> Result<Claim, WardenError> {
    warden.sessions().claim(
        session.id,
        ClaimInput {
            pattern: pattern.to_string(),
            claim_type,
        },
    )
}

speculate! {
    before {
        let h = harness(WardenConfig::default());
        let warden = &h.warden;
    }

    describe "start_session" {
        it "creates an active session stamped with the current time" {
            let session = start(warden, "shop", "alice");

            assert!(session.is_active());
            assert_eq!(session.project, "shop");
            assert_eq!(session.agent_name, "alice");
            assert_eq!(session.started_at, h.clock.now());
            assert_eq!(session.last_activity_at, session.started_at);
            assert!(session.ended_at.is_none());
            assert_eq!(h.bulletin.count(ActivityKind::SessionStart), 1);
        }

        it "requires a project and an agent name" {
            let result = warden.sessions().start_session(StartSessionInput {
                project: "  ".to_string(),
                agent_name: "alice".to_string(),
                intent_id: None,
            });
            assert!(matches!(result, Err(WardenError::InvalidInput(_))));
        }

        it "rejects an unknown intent" {
            let result = warden.sessions().start_session(StartSessionInput {
                project: "shop".to_string(),
                agent_name: "alice".to_string(),
                intent_id: Some(Uuid::new_v4()),
            });
            assert!(matches!(result, Err(WardenError::NotFound { entity: "intent", .. })));
        }
    }

    describe "claim" {
        it "resolves the payments and docs scenario" {
            let a = start(warden, "shop", "alice");
            let b = start(warden, "shop", "bob");

            let held = claim(warden, &a, "src/payments/**", ClaimType::Hard).expect("A's claim should succeed");

            match claim(warden, &b, "src/payments/charge.ts", ClaimType::Hard) {
                Err(WardenError::Conflict { session_id, agent_name, claim_id, pattern }) => {
                    assert_eq!(session_id, a.id);
                    assert_eq!(agent_name, "alice");
                    assert_eq!(claim_id, held.id);
                    assert_eq!(pattern, "src/payments/**");
                }
                other => panic!("Expected conflict, got {:?}", other),
            }

            let docs = claim(warden, &b, "docs/**", ClaimType::Hard).expect("B's docs claim should succeed");
            assert_eq!(docs.session_id, b.id);
        }

        it "accepts disjoint patterns" {
            let a = start(warden, "shop", "alice");
            let b = start(warden, "shop", "bob");

            claim(warden, &a, "src/payments/**", ClaimType::Hard).unwrap();
            claim(warden, &b, "src/payment/**", ClaimType::Hard).unwrap();
            claim(warden, &b, "src/*.md", ClaimType::Hard).unwrap();
            claim(warden, &b, "README.md", ClaimType::Hard).unwrap();
        }

        it "never conflicts with the same session's own claims" {
            let a = start(warden, "shop", "alice");
            claim(warden, &a, "src/**", ClaimType::Hard).unwrap();
            claim(warden, &a, "src/main.rs", ClaimType::Hard).unwrap();
            claim(warden, &a, "src/main.rs", ClaimType::Soft).unwrap();
        }

        it "lets two soft claims on the same pattern coexist" {
            let a = start(warden, "shop", "alice");
            let b = start(warden, "shop", "bob");

            claim(warden, &a, "src/api/**", ClaimType::Soft).unwrap();
            claim(warden, &b, "src/api/**", ClaimType::Soft).unwrap();

            assert_eq!(warden.sessions().active_claims("shop").unwrap().len(), 2);
        }

        it "blocks mixed claim types by default" {
            let a = start(warden, "shop", "alice");
            let b = start(warden, "shop", "bob");
            let c = start(warden, "shop", "carol");

            claim(warden, &a, "src/api/**", ClaimType::Hard).unwrap();
            assert!(matches!(
                claim(warden, &b, "src/api/routes.rs", ClaimType::Soft),
                Err(WardenError::Conflict { .. })
            ));

            claim(warden, &b, "web/**", ClaimType::Soft).unwrap();
            assert!(matches!(
                claim(warden, &c, "web/index.html", ClaimType::Hard),
                Err(WardenError::Conflict { session_id, .. }) if session_id == b.id
            ));
        }

        it "scopes conflicts to a project" {
            let a = start(warden, "shop", "alice");
            let b = start(warden, "blog", "bob");

            claim(warden, &a, "src/**", ClaimType::Hard).unwrap();
            claim(warden, &b, "src/**", ClaimType::Hard).unwrap();
        }

        it "stops blocking once the holder releases or ends" {
            let a = start(warden, "shop", "alice");
            let b = start(warden, "shop", "bob");

            let held = claim(warden, &a, "src/**", ClaimType::Hard).unwrap();
            warden.sessions().release(held.id).unwrap();
            claim(warden, &b, "src/lib.rs", ClaimType::Hard).unwrap();

            let c = start(warden, "shop", "carol");
            claim(warden, &c, "docs/**", ClaimType::Hard).unwrap();
            warden.sessions().end_session(c.id).unwrap();
            claim(warden, &a, "docs/guide.md", ClaimType::Hard).unwrap();
        }

        it "normalizes the stored pattern" {
            let a = start(warden, "shop", "alice");
            let stored = claim(warden, &a, "./src\\payments/", ClaimType::Hard).unwrap();
            assert_eq!(stored.pattern, "src/payments");
        }

        it "rejects patterns that leave the project" {
            let a = start(warden, "shop", "alice");
            for pattern in ["", "../secrets", "src/../../etc"] {
                assert!(
                    matches!(claim(warden, &a, pattern, ClaimType::Hard), Err(WardenError::InvalidInput(_))),
                    "{:?}", pattern
                );
            }
        }

        it "rejects malformed globs" {
            let a = start(warden, "shop", "alice");
            assert!(matches!(
                claim(warden, &a, "src/[ab.rs", ClaimType::Hard),
                Err(WardenError::InvalidInput(_))
            ));
        }

        it "conflicts on wildcard pairs it cannot separate" {
            let a = start(warden, "shop", "alice");
            let b = start(warden, "shop", "bob");

            claim(warden, &a, "src/*.[ch]", ClaimType::Hard).unwrap();
            assert!(matches!(
                claim(warden, &b, "src/*.c", ClaimType::Hard),
                Err(WardenError::Conflict { session_id, .. }) if session_id == a.id
            ));
            claim(warden, &b, "src/main.rs", ClaimType::Hard).unwrap();
        }

        it "fails with StaleSession after the session ended" {
            let a = start(warden, "shop", "alice");
            warden.sessions().end_session(a.id).unwrap();

            assert!(matches!(
                claim(warden, &a, "src/**", ClaimType::Hard),
                Err(WardenError::StaleSession { session_id }) if session_id == a.id
            ));
        }

        it "fails with NotFound for an unknown session" {
            let result = warden.sessions().claim(Uuid::new_v4(), ClaimInput {
                pattern: "src/**".to_string(),
                claim_type: ClaimType::Hard,
            });
            assert!(matches!(result, Err(WardenError::NotFound { entity: "session", .. })));
        }

        it "counts as session activity" {
            let a = start(warden, "shop", "alice");
            h.clock.advance(Duration::minutes(5));
            claim(warden, &a, "src/**", ClaimType::Hard).unwrap();

            let refreshed = warden.sessions().get_session(a.id).unwrap();
            assert_eq!(refreshed.last_activity_at, a.started_at + Duration::minutes(5));
        }

        it "publishes registered and conflict events" {
            let a = start(warden, "shop", "alice");
            let b = start(warden, "shop", "bob");
            claim(warden, &a, "src/**", ClaimType::Hard).unwrap();
            let _ = claim(warden, &b, "src/x.rs", ClaimType::Hard);

            assert_eq!(h.bulletin.count(ActivityKind::ClaimRegistered), 1);
            assert_eq!(h.bulletin.count(ActivityKind::ClaimConflict), 1);

            let conflict = h.bulletin.events().into_iter()
                .find(|e| e.kind == ActivityKind::ClaimConflict)
                .unwrap();
            assert_eq!(conflict.entity_id, b.id.to_string());
            assert_eq!(conflict.detail["blocking_session_id"], a.id.to_string());
        }

        it "admits exactly one of many simultaneous overlapping hard claims" {
            let sessions: Vec<Session> = (0..8)
                .map(|i| start(warden, "shop", &format!("agent-{}", i)))
                .collect();

            let results: Vec<Result<Claim, WardenError>> = std::thread::scope(|scope| {
                let handles: Vec<_> = sessions
                    .iter()
                    .map(|s| {
                        let warden = warden.clone();
                        scope.spawn(move || claim(&warden, s, "src/shared/**", ClaimType::Hard))
                    })
                    .collect();
                handles.into_iter().map(|handle| handle.join().unwrap()).collect()
            });

            let won = results.iter().filter(|r| r.is_ok()).count();
            let lost = results
                .iter()
                .filter(|r| matches!(r, Err(WardenError::Conflict { .. })))
                .count();
            assert_eq!(won, 1);
            assert_eq!(lost, 7);
        }
    }

    describe "release" {
        it "is idempotent and keeps the first release time" {
            let a = start(warden, "shop", "alice");
            let held = claim(warden, &a, "src/**", ClaimType::Hard).unwrap();

            let first = warden.sessions().release(held.id).unwrap();
            h.clock.advance(Duration::minutes(1));
            let second = warden.sessions().release(held.id).unwrap();

            assert!(first.released_at.is_some());
            assert_eq!(second.released_at, first.released_at);
            assert_eq!(h.bulletin.count(ActivityKind::ClaimReleased), 1);
        }

        it "fails with NotFound for an unknown claim" {
            assert!(matches!(
                warden.sessions().release(Uuid::new_v4()),
                Err(WardenError::NotFound { entity: "claim", .. })
            ));
        }
    }

    describe "heartbeat" {
        it "refreshes last activity" {
            let a = start(warden, "shop", "alice");
            h.clock.advance(Duration::seconds(90));

            let beat = warden.sessions().heartbeat(a.id).unwrap();
            assert_eq!(beat.last_activity_at, a.started_at + Duration::seconds(90));
        }

        it "fails with StaleSession once the session ended" {
            let a = start(warden, "shop", "alice");
            warden.sessions().end_session(a.id).unwrap();

            assert!(matches!(
                warden.sessions().heartbeat(a.id),
                Err(WardenError::StaleSession { .. })
            ));
        }
    }

    describe "end_session" {
        it "releases every claim and marks the session ended" {
            let a = start(warden, "shop", "alice");
            claim(warden, &a, "src/**", ClaimType::Hard).unwrap();
            claim(warden, &a, "docs/**", ClaimType::Soft).unwrap();
            let already = claim(warden, &a, "web/**", ClaimType::Hard).unwrap();
            warden.sessions().release(already.id).unwrap();

            let ended = warden.sessions().end_session(a.id).unwrap();

            assert_eq!(ended.session.status, SessionStatus::Ended);
            assert_eq!(ended.session.end_reason, Some(EndReason::Explicit));
            assert_eq!(ended.released.len(), 2);

            let claims = warden.sessions().list_claims(a.id).unwrap();
            assert_eq!(claims.len(), 3);
            assert!(claims.iter().all(|c| c.is_released()));
            assert!(warden.sessions().active_claims("shop").unwrap().is_empty());
        }

        it "is idempotent" {
            let a = start(warden, "shop", "alice");
            claim(warden, &a, "src/**", ClaimType::Hard).unwrap();

            let first = warden.sessions().end_session(a.id).unwrap();
            h.clock.advance(Duration::minutes(1));
            let second = warden.sessions().end_session(a.id).unwrap();

            assert_eq!(second.session.ended_at, first.session.ended_at);
            assert!(second.released.is_empty());
            assert_eq!(h.bulletin.count(ActivityKind::SessionEnd), 1);
        }

        it "fails with NotFound for an unknown session" {
            assert!(matches!(
                warden.sessions().end_session(Uuid::new_v4()),
                Err(WardenError::NotFound { .. })
            ));
        }
    }

    describe "list_sessions" {
        it "filters by project and status" {
            let a = start(warden, "shop", "alice");
            start(warden, "shop", "bob");
            start(warden, "blog", "carol");
            warden.sessions().end_session(a.id).unwrap();

            let active_shop = warden.sessions().list_sessions(&SessionFilter {
                project: Some("shop".to_string()),
                status: Some(SessionStatus::Active),
                ..Default::default()
            }).unwrap();
            assert_eq!(active_shop.len(), 1);
            assert_eq!(active_shop[0].agent_name, "bob");

            let all = warden.sessions().list_sessions(&SessionFilter::default()).unwrap();
            assert_eq!(all.len(), 3);
        }

        it "filters by start time" {
            start(warden, "shop", "alice");
            h.clock.advance(Duration::hours(1));
            let cutoff = h.clock.now();
            start(warden, "shop", "bob");

            let late = warden.sessions().list_sessions(&SessionFilter {
                started_after: Some(cutoff),
                ..Default::default()
            }).unwrap();
            assert_eq!(late.len(), 1);
            assert_eq!(late[0].agent_name, "bob");

            let early = warden.sessions().list_sessions(&SessionFilter {
                started_before: Some(cutoff),
                ..Default::default()
            }).unwrap();
            assert_eq!(early.len(), 1);
            assert_eq!(early[0].agent_name, "alice");
        }
    }
}

mod own_harness {
    use super::*;

    #[test]
    fn rejects_agents_on_the_ignore_list() {
        let h = harness(WardenConfig {
            ignored_agents: vec!["dependabot".to_string(), "bot-*".to_string()],
            ..Default::default()
        });

        for agent in ["dependabot", "bot-42"] {
            let result = h.warden.sessions().start_session(StartSessionInput {
                project: "shop".to_string(),
                agent_name: agent.to_string(),
                intent_id: None,
            });
            assert!(matches!(result, Err(WardenError::AgentIgnored { .. })), "{}", agent);
        }

        assert!(h.warden.sessions().list_sessions(&SessionFilter::default()).unwrap().is_empty());
        assert_eq!(h.bulletin.count(ActivityKind::SessionStart), 0);
    }

    #[test]
    fn lets_the_second_of_two_overlapping_hard_claims_fail_regardless_of_order() {
        let pairs = [
            ("src/lib.rs", "src/lib.rs"),
            ("src", "src/lib.rs"),
            ("src/*.rs", "src/lib.rs"),
            ("**/*.ts", "web/app.ts"),
            ("src/payments/charge.ts", "src/payments/**"),
        ];

        for (first, second) in pairs {
            let h = harness(WardenConfig::default());
            let a = start(&h.warden, "shop", "alice");
            let b = start(&h.warden, "shop", "bob");

            claim(&h.warden, &a, first, ClaimType::Hard).expect("first claim should succeed");
            let result = claim(&h.warden, &b, second, ClaimType::Hard);
            assert!(
                matches!(result, Err(WardenError::Conflict { session_id, .. }) if session_id == a.id),
                "{} then {}", first, second
            );
        }
    }

    #[test]
    fn lets_mixed_claim_types_coexist_when_the_policy_allows_it() {
        let h = harness(lenient());
        let a = start(&h.warden, "shop", "alice");
        let b = start(&h.warden, "shop", "bob");
        let c = start(&h.warden, "shop", "carol");

        claim(&h.warden, &a, "src/api/**", ClaimType::Hard).unwrap();
        claim(&h.warden, &b, "src/api/routes.rs", ClaimType::Soft).unwrap();
        claim(&h.warden, &c, "src/api/**", ClaimType::Soft).unwrap();

        // Hard against hard still conflicts.
        assert!(matches!(
            claim(&h.warden, &c, "src/api/mod.rs", ClaimType::Hard),
            Err(WardenError::Conflict { session_id, .. }) if session_id == a.id
        ));
    }
}
