use automode::db::{Database, FeatureStore};
use automode::models::*;
use speculate2::speculate;

const PROJECT: &str = "/work/shop";

fn input(id: &str, title: &str) -> CreateFeatureInput {
    CreateFeatureInput {
        id: Some(id.to_string()),
        title: title.to_string(),
        ..Default::default()
    }
}

speculate! {
    before {
        let db = Database::open_memory().expect("Failed to create in-memory database");
        db.migrate().expect("Failed to run migrations");
    }

    describe "create_feature" {
        it "applies defaults for omitted fields" {
            let feature = db.create_feature(PROJECT, CreateFeatureInput {
                title: "Checkout".to_string(),
                ..Default::default()
            }).expect("Failed to create feature");

            assert!(feature.id.starts_with("feature-"));
            assert_eq!(feature.project_path, PROJECT);
            assert_eq!(feature.status, FeatureStatus::Backlog);
            assert_eq!(feature.priority, DEFAULT_PRIORITY);
            assert_eq!(feature.complexity, Complexity::Moderate);
            assert!(feature.dependencies.is_empty());
            assert!(feature.branch_name.is_none());
            assert!(feature.error.is_none());
        }

        it "keeps a caller-chosen id and every field" {
            let feature = db.create_feature(PROJECT, CreateFeatureInput {
                id: Some("cart".to_string()),
                title: "Cart".to_string(),
                description: Some("Add items to a cart".to_string()),
                status: Some(FeatureStatus::Verified),
                dependencies: vec!["catalog".to_string()],
                priority: Some(1),
                complexity: Some(Complexity::Complex),
                branch_name: Some("feature/cart".to_string()),
            }).expect("Failed to create feature");

            assert_eq!(feature.id, "cart");
            assert_eq!(feature.status, FeatureStatus::Verified);
            assert_eq!(feature.dependencies, vec!["catalog".to_string()]);
            assert_eq!(feature.priority, 1);
            assert_eq!(feature.branch_name.as_deref(), Some("feature/cart"));
        }

        it "stores a blank branch as the primary worktree" {
            let feature = db.create_feature(PROJECT, CreateFeatureInput {
                branch_name: Some("   ".to_string()),
                ..input("a", "A")
            }).expect("Failed to create feature");

            assert!(feature.branch_name.is_none());
        }

        it "rejects a missing title" {
            let err = db.create_feature(PROJECT, input("a", "  ")).unwrap_err();
            assert!(err.to_string().contains("required"));
        }

        it "rejects a missing project path" {
            let err = db.create_feature("", input("a", "A")).unwrap_err();
            assert!(err.to_string().contains("required"));
        }

        it "rejects a duplicate id within a project" {
            db.create_feature(PROJECT, input("a", "A")).expect("Failed to create");
            let err = db.create_feature(PROJECT, input("a", "Again")).unwrap_err();
            assert!(err.to_string().contains("already exists"));
        }

        it "allows the same id in different projects" {
            db.create_feature(PROJECT, input("a", "A")).expect("Failed to create");
            let other = db.create_feature("/work/blog", input("a", "A")).expect("Failed to create");
            assert_eq!(other.project_path, "/work/blog");
        }
    }

    describe "get_features_by_project" {
        it "returns features in declaration order" {
            for id in ["c", "a", "b"] {
                db.create_feature(PROJECT, input(id, id)).expect("Failed to create");
            }

            let ids: Vec<String> = db.get_features_by_project(PROJECT)
                .expect("Query failed")
                .into_iter()
                .map(|f| f.id)
                .collect();
            assert_eq!(ids, vec!["c", "a", "b"]);
        }

        it "only returns the requested project" {
            db.create_feature(PROJECT, input("a", "A")).expect("Failed to create");
            db.create_feature("/work/blog", input("b", "B")).expect("Failed to create");

            let features = db.get_features_by_project(PROJECT).expect("Query failed");
            assert_eq!(features.len(), 1);
            assert_eq!(features[0].id, "a");
        }

        it "round-trips dependencies" {
            db.create_feature(PROJECT, CreateFeatureInput {
                dependencies: vec!["x".to_string(), "y".to_string()],
                ..input("a", "A")
            }).expect("Failed to create");

            let feature = db.get_feature(PROJECT, "a").expect("Query failed").expect("Missing feature");
            assert_eq!(feature.dependencies, vec!["x".to_string(), "y".to_string()]);
        }
    }

    describe "list_projects" {
        it "returns each project path once" {
            db.create_feature("/work/shop", input("a", "A")).expect("Failed to create");
            db.create_feature("/work/shop", input("b", "B")).expect("Failed to create");
            db.create_feature("/work/blog", input("a", "A")).expect("Failed to create");

            let projects = db.list_projects().expect("Query failed");
            assert_eq!(projects, vec!["/work/blog".to_string(), "/work/shop".to_string()]);
        }
    }

    describe "update_feature" {
        it "returns None for an unknown feature" {
            let updated = db.update_feature(PROJECT, "missing", UpdateFeatureInput::default())
                .expect("Update failed");
            assert!(updated.is_none());
        }

        it "changes only the given fields" {
            db.create_feature(PROJECT, CreateFeatureInput {
                description: Some("original".to_string()),
                ..input("a", "A")
            }).expect("Failed to create");

            let updated = db.update_feature(PROJECT, "a", UpdateFeatureInput {
                priority: Some(7),
                ..Default::default()
            }).expect("Update failed").expect("Missing feature");

            assert_eq!(updated.priority, 7);
            assert_eq!(updated.title, "A");
            assert_eq!(updated.description.as_deref(), Some("original"));

            let stored = db.get_feature(PROJECT, "a").expect("Query failed").expect("Missing");
            assert_eq!(stored.priority, 7);
        }

        it "moves a feature back to the primary worktree on an empty branch" {
            db.create_feature(PROJECT, CreateFeatureInput {
                branch_name: Some("feature/x".to_string()),
                ..input("a", "A")
            }).expect("Failed to create");

            let updated = db.update_feature(PROJECT, "a", UpdateFeatureInput {
                branch_name: Some(String::new()),
                ..Default::default()
            }).expect("Update failed").expect("Missing feature");

            assert!(updated.branch_name.is_none());
        }

        it "clears the error when a failed feature is sent back to the backlog" {
            db.create_feature(PROJECT, input("a", "A")).expect("Failed to create");
            db.set_status(PROJECT, "a", FeatureStatus::Failed, Some("boom")).expect("Failed to set status");

            let updated = db.update_feature(PROJECT, "a", UpdateFeatureInput {
                status: Some(FeatureStatus::Backlog),
                ..Default::default()
            }).expect("Update failed").expect("Missing feature");

            assert_eq!(updated.status, FeatureStatus::Backlog);
            assert!(updated.error.is_none());
        }
    }

    describe "delete_feature" {
        it "removes the feature" {
            db.create_feature(PROJECT, input("a", "A")).expect("Failed to create");
            assert!(db.delete_feature(PROJECT, "a").expect("Delete failed"));
            assert!(db.get_feature(PROJECT, "a").expect("Query failed").is_none());
        }

        it "returns false when nothing was deleted" {
            assert!(!db.delete_feature(PROJECT, "missing").expect("Delete failed"));
        }
    }

    describe "feature store" {
        it "records status and error" {
            db.create_feature(PROJECT, input("a", "A")).expect("Failed to create");

            assert!(db.set_status(PROJECT, "a", FeatureStatus::Failed, Some("exit 1")).expect("Failed to set status"));

            let feature = db.get_feature(PROJECT, "a").expect("Query failed").expect("Missing");
            assert_eq!(feature.status, FeatureStatus::Failed);
            assert_eq!(feature.error.as_deref(), Some("exit 1"));
        }

        it "reports a vanished feature" {
            assert!(!db.set_status(PROJECT, "gone", FeatureStatus::InProgress, None).expect("Failed to set status"));
        }

        it "lists the same snapshot as get_features_by_project" {
            db.create_feature(PROJECT, input("a", "A")).expect("Failed to create");
            let store: &dyn FeatureStore = &db;
            assert_eq!(store.list_features(PROJECT).expect("List failed").len(), 1);
        }
    }
}
