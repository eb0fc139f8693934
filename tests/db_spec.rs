use std::collections::BTreeMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rocket_warden::db::Database;
use rocket_warden::models::*;
use speculate2::speculate;
use uuid::Uuid;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

fn new_session(project: &str, agent: &str, at: DateTime<Utc>) -> Session {
    Session {
        id: Uuid::new_v4(),
        project: project.to_string(),
        agent_name: agent.to_string(),
        intent_id: None,
        status: SessionStatus::Active,
        started_at: at,
        last_activity_at: at,
        ended_at: None,
        end_reason: None,
    }
}

fn new_claim(session_id: Uuid, pattern: &str, at: DateTime<Utc>) -> Claim {
    Claim {
        id: Uuid::new_v4(),
        session_id,
        pattern: pattern.to_string(),
        claim_type: ClaimType::Hard,
        created_at: at,
        released_at: None,
    }
}

fn new_intent(project: &str, at: DateTime<Utc>) -> Intent {
    Intent {
        id: Uuid::new_v4(),
        project: project.to_string(),
        author: "alice".to_string(),
        description: "Add refunds".to_string(),
        contract_ref: Some("specs/refunds.md".to_string()),
        contract_hash: Some("ab".repeat(32)),
        acceptance_criteria: vec!["refunds settle".to_string()],
        out_of_scope: vec!["chargebacks".to_string()],
        status: IntentStatus::Pending,
        status_reason: None,
        build_id: None,
        created_at: at,
        updated_at: at,
    }
}

fn new_manifest(project: &str, sequence: u64, at: DateTime<Utc>) -> EvidenceManifest {
    let mut files = BTreeMap::new();
    files.insert(
        "dist/app.js".to_string(),
        FileEvidence {
            path: "dist/app.js".to_string(),
            hash: format!("{:064x}", sequence + 1),
            size: 42,
        },
    );
    EvidenceManifest {
        build_id: Uuid::new_v4().to_string(),
        project: project.to_string(),
        intent_id: Uuid::new_v4(),
        sequence,
        created_at: at,
        files,
        chain_hash: format!("{:064x}", 1000 + sequence),
    }
}

speculate! {
    before {
        let db = Database::open_memory().expect("Failed to create in-memory database");
        db.migrate().expect("Failed to run migrations");
    }

    describe "sessions" {
        it "round-trips a session" {
            let session = new_session("shop", "alice", t0());
            db.insert_session(&session).expect("Insert failed");

            let found = db.get_session(session.id).expect("Query failed");
            assert_eq!(found, Some(session));
        }

        it "returns None for a non-existent session" {
            assert!(db.get_session(Uuid::new_v4()).expect("Query failed").is_none());
        }

        it "filters by project and start time" {
            db.insert_session(&new_session("shop", "alice", t0())).unwrap();
            db.insert_session(&new_session("shop", "bob", t0() + Duration::hours(2))).unwrap();
            db.insert_session(&new_session("billing", "carol", t0())).unwrap();

            let shop = db.list_sessions(&SessionFilter {
                project: Some("shop".to_string()),
                ..Default::default()
            }).unwrap();
            assert_eq!(shop.len(), 2);

            let late = db.list_sessions(&SessionFilter {
                started_after: Some(t0() + Duration::hours(1)),
                ..Default::default()
            }).unwrap();
            assert_eq!(late.len(), 1);
            assert_eq!(late[0].agent_name, "bob");
        }

        it "touches only active sessions" {
            let session = new_session("shop", "alice", t0());
            db.insert_session(&session).unwrap();

            assert!(db.touch_session(session.id, t0() + Duration::minutes(1)).unwrap());
            db.end_session(session.id, t0() + Duration::minutes(2), EndReason::Explicit).unwrap();
            assert!(!db.touch_session(session.id, t0() + Duration::minutes(3)).unwrap());

            let stored = db.get_session(session.id).unwrap().unwrap();
            assert_eq!(stored.last_activity_at, t0() + Duration::minutes(1));
        }

        it "ends a session and releases its claims together" {
            let session = new_session("shop", "alice", t0());
            db.insert_session(&session).unwrap();
            db.insert_claim(&new_claim(session.id, "src/**", t0())).unwrap();
            db.insert_claim(&new_claim(session.id, "docs/**", t0())).unwrap();

            let at = t0() + Duration::minutes(5);
            let ended = db.end_session(session.id, at, EndReason::Timeout).unwrap().unwrap();
            assert_eq!(ended.session.status, SessionStatus::Ended);
            assert_eq!(ended.session.end_reason, Some(EndReason::Timeout));
            assert_eq!(ended.released.len(), 2);
            assert!(ended.released.iter().all(|c| c.released_at == Some(at)));
            assert!(db.get_active_claims("shop").unwrap().is_empty());
        }

        it "leaves an ended session unchanged when ended again" {
            let session = new_session("shop", "alice", t0());
            db.insert_session(&session).unwrap();
            db.end_session(session.id, t0(), EndReason::Explicit).unwrap();

            let again = db.end_session(session.id, t0() + Duration::hours(1), EndReason::Timeout)
                .unwrap()
                .unwrap();
            assert!(again.released.is_empty());
            assert_eq!(again.session.end_reason, Some(EndReason::Explicit));
            assert_eq!(again.session.ended_at, Some(t0()));
        }

        it "returns None when ending an unknown session" {
            assert!(db.end_session(Uuid::new_v4(), t0(), EndReason::Explicit).unwrap().is_none());
        }
    }

    describe "claims" {
        it "lists active claims with their holder" {
            let alice = new_session("shop", "alice", t0());
            let bob = new_session("billing", "bob", t0());
            db.insert_session(&alice).unwrap();
            db.insert_session(&bob).unwrap();
            db.insert_claim(&new_claim(alice.id, "src/**", t0())).unwrap();
            db.insert_claim(&new_claim(bob.id, "src/**", t0())).unwrap();

            let held = db.get_active_claims("shop").unwrap();
            assert_eq!(held.len(), 1);
            assert_eq!(held[0].agent_name, "alice");
        }

        it "releases a claim once" {
            let session = new_session("shop", "alice", t0());
            db.insert_session(&session).unwrap();
            let claim = new_claim(session.id, "src/**", t0());
            db.insert_claim(&claim).unwrap();

            let (first, released) = db.release_claim(claim.id, t0() + Duration::minutes(1)).unwrap().unwrap();
            assert!(released);
            assert!(first.is_released());

            let (second, released) = db.release_claim(claim.id, t0() + Duration::minutes(2)).unwrap().unwrap();
            assert!(!released);
            assert_eq!(second.released_at, first.released_at);
        }

        it "returns None when releasing an unknown claim" {
            assert!(db.release_claim(Uuid::new_v4(), t0()).unwrap().is_none());
        }

        it "keeps released claims in the session history" {
            let session = new_session("shop", "alice", t0());
            db.insert_session(&session).unwrap();
            let claim = new_claim(session.id, "src/**", t0());
            db.insert_claim(&claim).unwrap();
            db.release_claim(claim.id, t0()).unwrap();

            let history = db.get_claims_by_session(session.id).unwrap();
            assert_eq!(history.len(), 1);
            assert!(history[0].is_released());
        }
    }

    describe "intents" {
        it "round-trips an intent with its lists" {
            let intent = new_intent("shop", t0());
            db.insert_intent(&intent).unwrap();
            assert_eq!(db.get_intent(intent.id).unwrap(), Some(intent));
        }

        it "transitions only from the expected status" {
            let intent = new_intent("shop", t0());
            db.insert_intent(&intent).unwrap();

            let later = t0() + Duration::minutes(1);
            assert!(!db.transition_intent(
                intent.id, IntentStatus::Approved, IntentStatus::InProgress, later, None, None
            ).unwrap());
            assert!(db.transition_intent(
                intent.id, IntentStatus::Pending, IntentStatus::Rejected, later, Some("duplicate"), None
            ).unwrap());

            let stored = db.get_intent(intent.id).unwrap().unwrap();
            assert_eq!(stored.status, IntentStatus::Rejected);
            assert_eq!(stored.status_reason.as_deref(), Some("duplicate"));
            assert_eq!(stored.updated_at, later);
        }

        it "filters by status" {
            let pending = new_intent("shop", t0());
            let approved = new_intent("shop", t0());
            db.insert_intent(&pending).unwrap();
            db.insert_intent(&approved).unwrap();
            db.transition_intent(
                approved.id, IntentStatus::Pending, IntentStatus::Approved, t0(), None, None
            ).unwrap();

            let found = db.list_intents(&IntentFilter {
                status: Some(IntentStatus::Approved),
                ..Default::default()
            }).unwrap();
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].id, approved.id);
        }
    }

    describe "manifests" {
        it "round-trips a manifest with its files" {
            let manifest = new_manifest("shop", 0, t0());
            db.append_manifest(&manifest).unwrap();
            assert_eq!(db.get_manifest(&manifest.build_id).unwrap(), Some(manifest));
        }

        it "refuses a second manifest at the same sequence" {
            db.append_manifest(&new_manifest("shop", 0, t0())).unwrap();
            assert!(db.append_manifest(&new_manifest("shop", 0, t0())).is_err());
            db.append_manifest(&new_manifest("billing", 0, t0())).unwrap();
        }

        it "returns the ledger in sequence order and the latest entry" {
            for sequence in 0..3 {
                db.append_manifest(&new_manifest("shop", sequence, t0() + Duration::seconds(sequence as i64))).unwrap();
            }

            let ledger = db.get_ledger("shop").unwrap();
            let sequences: Vec<u64> = ledger.iter().map(|m| m.sequence).collect();
            assert_eq!(sequences, vec![0, 1, 2]);
            assert_eq!(db.latest_manifest("shop").unwrap().map(|m| m.sequence), Some(2));
            assert!(db.latest_manifest("billing").unwrap().is_none());
        }
    }

    describe "artifacts" {
        it "stores content once per hash" {
            assert!(db.put_artifact("abc", b"bytes", t0()).unwrap());
            assert!(!db.put_artifact("abc", b"bytes", t0()).unwrap());
            assert!(db.has_artifact("abc").unwrap());
            assert_eq!(db.get_artifact("abc").unwrap(), Some(b"bytes".to_vec()));
            assert_eq!(db.count_artifacts().unwrap(), 1);
        }

        it "knows which artifacts a manifest references" {
            let manifest = new_manifest("shop", 0, t0());
            let hash = manifest.files["dist/app.js"].hash.clone();
            db.append_manifest(&manifest).unwrap();

            assert!(db.artifact_referenced(&hash).unwrap());
            assert!(!db.artifact_referenced(&"f".repeat(64)).unwrap());
        }

        it "deletes an artifact" {
            db.put_artifact("abc", b"bytes", t0()).unwrap();
            assert!(db.delete_artifact("abc").unwrap());
            assert!(db.get_artifact("abc").unwrap().is_none());
        }
    }
}

mod unreadable_rows {
    use super::*;

    fn file_db() -> (tempfile::TempDir, std::path::PathBuf, Database) {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("warden.db");
        let db = Database::open(path.clone()).expect("Failed to open database");
        db.migrate().expect("Failed to run migrations");
        (dir, path, db)
    }

    fn corrupt(path: &std::path::Path, sql: &str) {
        let conn = rusqlite::Connection::open(path).expect("Failed to open database");
        conn.execute(sql, []).expect("Failed to corrupt row");
    }

    #[test]
    fn reads_an_unknown_session_status_as_active() {
        let (_dir, path, db) = file_db();
        let session = new_session("shop", "alice", t0());
        db.insert_session(&session).unwrap();
        corrupt(&path, "UPDATE sessions SET status = 'paused', end_reason = 'vanished'");

        let stored = db.get_session(session.id).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Active);
        assert!(stored.end_reason.is_none());
    }

    #[test]
    fn reads_an_unknown_claim_type_as_hard() {
        let (_dir, path, db) = file_db();
        let session = new_session("shop", "alice", t0());
        db.insert_session(&session).unwrap();
        let mut claim = new_claim(session.id, "src/**", t0());
        claim.claim_type = ClaimType::Soft;
        db.insert_claim(&claim).unwrap();
        corrupt(&path, "UPDATE claims SET claim_type = 'exclusive'");

        assert_eq!(db.get_claim(claim.id).unwrap().unwrap().claim_type, ClaimType::Hard);
    }

    #[test]
    fn reads_unparseable_intent_lists_as_empty() {
        let (_dir, path, db) = file_db();
        let intent = new_intent("shop", t0());
        db.insert_intent(&intent).unwrap();
        corrupt(&path, "UPDATE intents SET acceptance_criteria = '{', updated_at = 'yesterday'");

        let stored = db.get_intent(intent.id).unwrap().unwrap();
        assert!(stored.acceptance_criteria.is_empty());
        assert_eq!(stored.out_of_scope, intent.out_of_scope);
        assert_eq!(stored.updated_at, DateTime::<Utc>::UNIX_EPOCH);
    }
}
