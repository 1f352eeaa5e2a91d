//! Integration tests for the database layer.
//!
//! These tests verify the core database operations using an in-memory SQLite database.
//! Tests are organized by module and functionality.

use taskflow::blob::{BlobStore, FsBlobStore};
use taskflow::db::query::{TaskFilter, TaskQuery, TaskView, UPCOMING_WINDOW_MS, parse_ordering};
use taskflow::db::tasks::{NewTask, TaskPatch};
use taskflow::db::{Database, PageRequest, now_ms};
use taskflow::error::{ApiError, ErrorCode};
use taskflow::types::{FileType, HistoryAction, Project, TaskStatus, User};

const HOUR_MS: i64 = 60 * 60 * 1000;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Helper to create a fresh in-memory database for testing.
fn setup_db() -> Database {
    Database::open_in_memory().expect("Failed to create in-memory database")
}

fn utc() -> chrono::FixedOffset {
    chrono::FixedOffset::east_opt(0).unwrap()
}

/// A user with one project.
fn setup_user(db: &Database, name: &str) -> (User, Project) {
    let user = db.create_user(name, "").expect("Failed to create user");
    let project = db
        .create_project(&user, &format!("{} project", name), None)
        .expect("Failed to create project");
    (user, project)
}

fn api_error(err: anyhow::Error) -> ApiError {
    err.into()
}

fn list(db: &Database, user: &User, query: TaskQuery, now: i64) -> Vec<String> {
    db.list_tasks(user, &query, utc(), now)
        .expect("Failed to list tasks")
        .items
        .into_iter()
        .map(|t| t.title)
        .collect()
}

mod task_tests {
    use super::*;

    #[test]
    fn create_and_read_round_trip() {
        let db = setup_db();
        let (alice, project) = setup_user(&db, "alice");

        let created = db
            .create_task(
                &alice,
                NewTask {
                    status: TaskStatus::InProgress,
                    priority: 2,
                    ..NewTask::new("Write docs", project.id)
                },
            )
            .unwrap();

        let task = db.get_task(&alice, created.id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.priority, 2);
        assert_eq!(task.project_id, project.id);
        assert_eq!(task.author_id, alice.id);
        assert_eq!(task.author_username, "alice");
        assert!(task.editor_id.is_none());
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn defaults_apply() {
        let db = setup_db();
        let (alice, project) = setup_user(&db, "alice");

        let task = db.create_task(&alice, NewTask::new("Defaults", project.id)).unwrap();
        assert_eq!(task.status, TaskStatus::Todo);
        assert_eq!(task.priority, 3);
        assert_eq!(task.description, "");
        assert!(task.due_date.is_none());
    }

    #[test]
    fn created_as_done_has_completed_at() {
        let db = setup_db();
        let (alice, project) = setup_user(&db, "alice");

        let task = db
            .create_task(
                &alice,
                NewTask {
                    status: TaskStatus::Done,
                    ..NewTask::new("Already finished", project.id)
                },
            )
            .unwrap();
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn completed_at_follows_status_changes() {
        let db = setup_db();
        let (alice, project) = setup_user(&db, "alice");
        let task = db.create_task(&alice, NewTask::new("Ship it", project.id)).unwrap();

        let done = db.change_status(&alice, task.id, TaskStatus::Done).unwrap();
        let completed_at = done.completed_at.expect("done sets completed_at");

        let again = db.change_status(&alice, task.id, TaskStatus::Done).unwrap();
        assert_eq!(again.completed_at, Some(completed_at));

        let reopened = db.change_status(&alice, task.id, TaskStatus::Todo).unwrap();
        assert!(reopened.completed_at.is_none());

        let parked = db.change_status(&alice, task.id, TaskStatus::Backlog).unwrap();
        assert!(parked.completed_at.is_none());
    }

    #[test]
    fn priority_outside_range_is_rejected() {
        let db = setup_db();
        let (alice, project) = setup_user(&db, "alice");

        for priority in [0, 6, -1] {
            let err = api_error(
                db.create_task(
                    &alice,
                    NewTask {
                        priority,
                        ..NewTask::new(format!("p{}", priority), project.id)
                    },
                )
                .unwrap_err(),
            );
            assert_eq!(err.code, ErrorCode::InvalidFieldValue);
            assert_eq!(err.field.as_deref(), Some("priority"));
        }
        for priority in 1..=5 {
            db.create_task(
                &alice,
                NewTask {
                    priority,
                    ..NewTask::new(format!("ok{}", priority), project.id)
                },
            )
            .unwrap();
        }

        let page = db
            .list_tasks(&alice, &TaskQuery::default(), utc(), now_ms())
            .unwrap();
        assert_eq!(page.total, 5);
    }

    #[test]
    fn failed_update_writes_nothing() {
        let db = setup_db();
        let (alice, project) = setup_user(&db, "alice");
        let task = db.create_task(&alice, NewTask::new("Stable", project.id)).unwrap();

        let patch = TaskPatch {
            title: Some("Renamed".into()),
            priority: Some(9),
            ..TaskPatch::default()
        };
        assert!(db.update_task(&alice, task.id, patch).is_err());

        let unchanged = db.get_task(&alice, task.id).unwrap().unwrap();
        assert_eq!(unchanged.title, "Stable");
        assert_eq!(unchanged.priority, 3);
    }

    #[test]
    fn past_due_date_rejected_on_create_only() {
        let db = setup_db();
        let (alice, project) = setup_user(&db, "alice");

        let err = api_error(
            db.create_task(
                &alice,
                NewTask {
                    due_date: Some(now_ms() - DAY_MS),
                    ..NewTask::new("Late", project.id)
                },
            )
            .unwrap_err(),
        );
        assert_eq!(err.field.as_deref(), Some("due_date"));

        let task = db.create_task(&alice, NewTask::new("Editable", project.id)).unwrap();
        let patch = TaskPatch {
            due_date: Some(Some(now_ms() - DAY_MS)),
            ..TaskPatch::default()
        };
        let updated = db.update_task(&alice, task.id, patch).unwrap();
        assert!(updated.due_date.is_some());

        let cleared = db
            .update_task(
                &alice,
                task.id,
                TaskPatch {
                    due_date: Some(None),
                    ..TaskPatch::default()
                },
            )
            .unwrap();
        assert!(cleared.due_date.is_none());
    }

    #[test]
    fn titles_unique_per_author() {
        let db = setup_db();
        let (alice, a_project) = setup_user(&db, "alice");
        let (bob, b_project) = setup_user(&db, "bob");

        let first = db.create_task(&alice, NewTask::new("Report", a_project.id)).unwrap();
        let err = api_error(
            db.create_task(&alice, NewTask::new("Report", a_project.id))
                .unwrap_err(),
        );
        assert_eq!(err.code, ErrorCode::AlreadyExists);
        assert_eq!(err.field.as_deref(), Some("title"));

        // Case-sensitive, and other authors are unaffected.
        db.create_task(&alice, NewTask::new("report", a_project.id)).unwrap();
        db.create_task(&bob, NewTask::new("Report", b_project.id)).unwrap();

        // Keeping one's own title on edit is fine.
        let same = TaskPatch {
            title: Some("Report".into()),
            ..TaskPatch::default()
        };
        db.update_task(&alice, first.id, same).unwrap();

        let clash = TaskPatch {
            title: Some("report".into()),
            ..TaskPatch::default()
        };
        assert!(db.update_task(&alice, first.id, clash).is_err());
    }

    #[test]
    fn project_must_belong_to_caller() {
        let db = setup_db();
        let (alice, _) = setup_user(&db, "alice");
        let (_bob, b_project) = setup_user(&db, "bob");

        let err = api_error(
            db.create_task(&alice, NewTask::new("Sneaky", b_project.id))
                .unwrap_err(),
        );
        assert_eq!(err.field.as_deref(), Some("project_id"));
    }

    #[test]
    fn tags_replace_on_update() {
        let db = setup_db();
        let (alice, project) = setup_user(&db, "alice");
        let urgent = db.create_tag("urgent", None).unwrap();
        let api = db.create_tag("api", None).unwrap();

        let task = db
            .create_task(
                &alice,
                NewTask {
                    tag_ids: vec![urgent.id],
                    ..NewTask::new("Tagged", project.id)
                },
            )
            .unwrap();
        assert_eq!(task.tags, vec![urgent.clone()]);

        let updated = db
            .update_task(
                &alice,
                task.id,
                TaskPatch {
                    tag_ids: Some(vec![api.id, urgent.id]),
                    ..TaskPatch::default()
                },
            )
            .unwrap();
        let names: Vec<_> = updated.tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["api", "urgent"]);

        let err = api_error(
            db.update_task(
                &alice,
                task.id,
                TaskPatch {
                    tag_ids: Some(vec![9999]),
                    ..TaskPatch::default()
                },
            )
            .unwrap_err(),
        );
        assert_eq!(err.field.as_deref(), Some("tags_ids"));
    }

    #[test]
    fn other_users_tasks_are_not_found() {
        let db = setup_db();
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());
        let (alice, project) = setup_user(&db, "alice");
        let (bob, _) = setup_user(&db, "bob");
        let task = db.create_task(&alice, NewTask::new("Private", project.id)).unwrap();

        assert!(db.get_task(&bob, task.id).unwrap().is_none());

        let err = api_error(
            db.change_status(&bob, task.id, TaskStatus::Done)
                .unwrap_err(),
        );
        assert_eq!(err.code, ErrorCode::TaskNotFound);

        assert!(!db.delete_task(&bob, task.id, &blobs).unwrap());
        assert!(db.get_task(&alice, task.id).unwrap().is_some());
    }
}

mod query_tests {
    use super::*;

    #[test]
    fn listing_is_scoped_to_the_caller() {
        let db = setup_db();
        let (alice, a_project) = setup_user(&db, "alice");
        let (bob, b_project) = setup_user(&db, "bob");
        db.create_task(&alice, NewTask::new("Alice 1", a_project.id)).unwrap();
        db.create_task(&alice, NewTask::new("Alice 2", a_project.id)).unwrap();
        db.create_task(&bob, NewTask::new("Bob 1", b_project.id)).unwrap();

        let titles = list(&db, &bob, TaskQuery::default(), now_ms());
        assert_eq!(titles, vec!["Bob 1"]);

        let page = db
            .list_tasks(&alice, &TaskQuery::default(), utc(), now_ms())
            .unwrap();
        assert!(page.items.iter().all(|t| t.author_id == alice.id));
        assert_eq!(page.total, 2);
    }

    #[test]
    fn default_order_is_newest_first() {
        let db = setup_db();
        let (alice, project) = setup_user(&db, "alice");
        for title in ["first", "second", "third"] {
            db.create_task(&alice, NewTask::new(title, project.id)).unwrap();
        }

        let titles = list(&db, &alice, TaskQuery::default(), now_ms());
        assert_eq!(titles, vec!["third", "second", "first"]);
    }

    #[test]
    fn ordering_by_priority_then_default_tiebreak() {
        let db = setup_db();
        let (alice, project) = setup_user(&db, "alice");
        for (title, priority) in [("low", 5), ("high", 1), ("mid-a", 3), ("mid-b", 3)] {
            db.create_task(
                &alice,
                NewTask {
                    priority,
                    ..NewTask::new(title, project.id)
                },
            )
            .unwrap();
        }

        let query = TaskQuery {
            ordering: parse_ordering("priority,bogus"),
            ..TaskQuery::default()
        };
        assert_eq!(list(&db, &alice, query, now_ms()), vec!["high", "mid-b", "mid-a", "low"]);
    }

    #[test]
    fn filters_combine() {
        let db = setup_db();
        let (alice, project) = setup_user(&db, "alice");
        let other = db.create_project(&alice, "Side", None).unwrap();

        db.create_task(
            &alice,
            NewTask {
                status: TaskStatus::InProgress,
                priority: 1,
                ..NewTask::new("Fix login", project.id)
            },
        )
        .unwrap();
        db.create_task(
            &alice,
            NewTask {
                priority: 1,
                ..NewTask::new("Fix signup", other.id)
            },
        )
        .unwrap();
        db.create_task(&alice, NewTask::new("Write blog", project.id)).unwrap();

        let query = TaskQuery {
            filter: TaskFilter {
                priority: Some(1),
                project_id: Some(project.id),
                ..TaskFilter::default()
            },
            ..TaskQuery::default()
        };
        assert_eq!(list(&db, &alice, query, now_ms()), vec!["Fix login"]);

        let query = TaskQuery {
            filter: TaskFilter {
                status: Some(TaskStatus::Todo),
                ..TaskFilter::default()
            },
            ..TaskQuery::default()
        };
        assert_eq!(list(&db, &alice, query, now_ms()), vec!["Write blog", "Fix signup"]);
    }

    #[test]
    fn search_matches_title_or_description_case_insensitively() {
        let db = setup_db();
        let (alice, project) = setup_user(&db, "alice");
        db.create_task(&alice, NewTask::new("Квартальный ОТЧЁТ", project.id)).unwrap();
        db.create_task(
            &alice,
            NewTask {
                description: "Needs the 100% figures".into(),
                ..NewTask::new("Numbers", project.id)
            },
        )
        .unwrap();
        db.create_task(&alice, NewTask::new("Unrelated", project.id)).unwrap();

        let search = |term: &str| TaskQuery {
            filter: TaskFilter {
                search: Some(term.to_string()),
                ..TaskFilter::default()
            },
            ..TaskQuery::default()
        };
        assert_eq!(list(&db, &alice, search("отчёт"), now_ms()), vec!["Квартальный ОТЧЁТ"]);
        assert_eq!(list(&db, &alice, search("100%"), now_ms()), vec!["Numbers"]);
        assert!(list(&db, &alice, search("%"), now_ms()).len() == 1);
        assert!(list(&db, &alice, search("_"), now_ms()).is_empty());
    }

    #[test]
    fn has_due_date_and_day_filters() {
        let db = setup_db();
        let (alice, project) = setup_user(&db, "alice");
        let tomorrow = now_ms() + DAY_MS;
        db.create_task(
            &alice,
            NewTask {
                due_date: Some(tomorrow),
                ..NewTask::new("Dated", project.id)
            },
        )
        .unwrap();
        db.create_task(&alice, NewTask::new("Undated", project.id)).unwrap();

        let with = TaskQuery {
            filter: TaskFilter {
                has_due_date: Some(true),
                ..TaskFilter::default()
            },
            ..TaskQuery::default()
        };
        assert_eq!(list(&db, &alice, with, now_ms()), vec!["Dated"]);

        let without = TaskQuery {
            filter: TaskFilter {
                has_due_date: Some(false),
                ..TaskFilter::default()
            },
            ..TaskQuery::default()
        };
        assert_eq!(list(&db, &alice, without, now_ms()), vec!["Undated"]);

        let day = chrono::DateTime::from_timestamp_millis(tomorrow)
            .unwrap()
            .date_naive();
        let on_day = TaskQuery {
            filter: TaskFilter {
                due_on: Some(day),
                ..TaskFilter::default()
            },
            ..TaskQuery::default()
        };
        assert_eq!(list(&db, &alice, on_day, now_ms()), vec!["Dated"]);

        let before = TaskQuery {
            filter: TaskFilter {
                due_until: day.pred_opt(),
                ..TaskFilter::default()
            },
            ..TaskQuery::default()
        };
        assert!(list(&db, &alice, before, now_ms()).is_empty());

        let from = TaskQuery {
            filter: TaskFilter {
                due_from: Some(day),
                ..TaskFilter::default()
            },
            ..TaskQuery::default()
        };
        assert_eq!(list(&db, &alice, from, now_ms()), vec!["Dated"]);
    }

    /// Tasks due at +1h, +2d and +10d. Evaluated at `now + 3d`, the first two are overdue.
    fn seed_due_tasks(db: &Database, user: &User, project: &Project) -> i64 {
        let now = now_ms();
        for (title, offset, status) in [
            ("soon", HOUR_MS, TaskStatus::Todo),
            ("two days", 2 * DAY_MS, TaskStatus::InProgress),
            ("ten days", 10 * DAY_MS, TaskStatus::Todo),
            ("finished", HOUR_MS, TaskStatus::Done),
            ("parked", 2 * DAY_MS, TaskStatus::Backlog),
        ] {
            db.create_task(
                user,
                NewTask {
                    due_date: Some(now + offset),
                    status,
                    ..NewTask::new(title, project.id)
                },
            )
            .unwrap();
        }
        db.create_task(user, NewTask::new("no date", project.id)).unwrap();
        now
    }

    #[test]
    fn overdue_excludes_done_and_backlog() {
        let db = setup_db();
        let (alice, project) = setup_user(&db, "alice");
        let now = seed_due_tasks(&db, &alice, &project);

        let query = TaskQuery {
            view: TaskView::Overdue,
            ..TaskQuery::default()
        };
        let page = db.list_tasks(&alice, &query, utc(), now + 3 * DAY_MS).unwrap();
        let mut titles: Vec<_> = page.items.iter().map(|t| t.title.as_str()).collect();
        titles.sort();
        assert_eq!(titles, vec!["soon", "two days"]);
        assert!(page.items.iter().all(|t| !t.status.is_closed()));

        // Nothing is overdue yet at creation time.
        let page = db.list_tasks(&alice, &query, utc(), now).unwrap();
        assert_eq!(page.total, 0);
    }

    #[test]
    fn upcoming_is_windowed_and_ascending() {
        let db = setup_db();
        let (alice, project) = setup_user(&db, "alice");
        let now = seed_due_tasks(&db, &alice, &project);

        let query = TaskQuery {
            view: TaskView::Upcoming,
            ordering: parse_ordering("-priority"),
            ..TaskQuery::default()
        };
        let page = db.list_tasks(&alice, &query, utc(), now).unwrap();
        let titles: Vec<_> = page.items.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["soon", "two days"]);

        let dues: Vec<i64> = page.items.iter().filter_map(|t| t.due_date).collect();
        assert!(dues.windows(2).all(|w| w[0] <= w[1]));
        assert!(dues.iter().all(|&d| d >= now && d <= now + UPCOMING_WINDOW_MS));
    }

    #[test]
    fn pagination_past_the_end_is_not_found() {
        let db = setup_db();
        let (alice, project) = setup_user(&db, "alice");
        for i in 0..3 {
            db.create_task(&alice, NewTask::new(format!("t{}", i), project.id)).unwrap();
        }

        let page2 = TaskQuery {
            page: PageRequest::new(2, 2),
            ..TaskQuery::default()
        };
        let page = db.list_tasks(&alice, &page2, utc(), now_ms()).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.total, 3);
        assert!(!page.has_next());

        let page3 = TaskQuery {
            page: PageRequest::new(3, 2),
            ..TaskQuery::default()
        };
        let err = api_error(db.list_tasks(&alice, &page3, utc(), now_ms()).unwrap_err());
        assert_eq!(err.code, ErrorCode::PageNotFound);

        let (bob, _) = setup_user(&db, "bob");
        let empty = db.list_tasks(&bob, &TaskQuery::default(), utc(), now_ms()).unwrap();
        assert_eq!(empty.total, 0);
    }

    #[test]
    fn huge_page_number_leaves_the_database_usable() {
        let db = setup_db();
        let (alice, project) = setup_user(&db, "alice");
        db.create_task(&alice, NewTask::new("Only one", project.id)).unwrap();

        let query = TaskQuery {
            page: PageRequest::new(i64::MAX, 20),
            ..TaskQuery::default()
        };
        let err = api_error(db.list_tasks(&alice, &query, utc(), now_ms()).unwrap_err());
        assert_eq!(err.code, ErrorCode::PageNotFound);

        let err = api_error(
            db.list_history(&alice, None, PageRequest::new(i64::MAX, 20))
                .unwrap_err(),
        );
        assert_eq!(err.code, ErrorCode::PageNotFound);

        assert!(db.get_user_by_token(&alice.api_token).unwrap().is_some());
        assert_eq!(list(&db, &alice, TaskQuery::default(), now_ms()), vec!["Only one"]);
    }

    #[test]
    fn ship_report_is_upcoming_for_its_author_only() {
        let db = setup_db();
        let (alice, project) = setup_user(&db, "alice");
        let (bob, _) = setup_user(&db, "bob");
        let now = now_ms();
        db.create_task(
            &alice,
            NewTask {
                priority: 2,
                due_date: Some(now + 3 * DAY_MS),
                ..NewTask::new("Ship report", project.id)
            },
        )
        .unwrap();

        let upcoming = TaskQuery {
            view: TaskView::Upcoming,
            ..TaskQuery::default()
        };
        assert_eq!(list(&db, &alice, upcoming.clone(), now), vec!["Ship report"]);
        assert!(list(&db, &bob, upcoming, now).is_empty());
    }
}

mod project_tests {
    use super::*;
    use taskflow::db::projects::ProjectPatch;

    #[test]
    fn search_and_scope() {
        let db = setup_db();
        let (alice, _) = setup_user(&db, "alice");
        let (bob, _) = setup_user(&db, "bob");
        db.create_project(&alice, "Website Redesign", Some("#112233")).unwrap();

        let page = db
            .list_projects(&alice, Some("redesign"), PageRequest::default())
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].color, "#112233");

        let page = db.list_projects(&bob, Some("redesign"), PageRequest::default()).unwrap();
        assert_eq!(page.total, 0);
    }

    #[test]
    fn update_is_scoped() {
        let db = setup_db();
        let (alice, project) = setup_user(&db, "alice");
        let (bob, _) = setup_user(&db, "bob");

        let patch = ProjectPatch {
            color: Some("#abcdef".into()),
            ..ProjectPatch::default()
        };
        let err = api_error(db.update_project(&bob, project.id, patch.clone()).unwrap_err());
        assert_eq!(err.code, ErrorCode::ProjectNotFound);

        let updated = db.update_project(&alice, project.id, patch).unwrap();
        assert_eq!(updated.color, "#abcdef");
        assert_eq!(updated.title, project.title);
    }

    #[test]
    fn delete_cascades_to_tasks_and_blobs() {
        let db = setup_db();
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());
        let (alice, project) = setup_user(&db, "alice");
        let task = db.create_task(&alice, NewTask::new("Doomed", project.id)).unwrap();
        let blob = blobs.put("notes.txt", b"hello").unwrap();
        db.create_attachment(&alice, task.id, &blob, "notes.txt", "", &blobs)
            .unwrap();

        assert!(db.delete_project(&alice, project.id, &blobs).unwrap());
        assert!(db.get_task(&alice, task.id).unwrap().is_none());
        assert!(blobs.size(&blob.name).is_err());

        let history = db.task_history(&alice, task.id).unwrap();
        assert_eq!(history[0].action, HistoryAction::Deleted);
        assert_eq!(history[0].task_title, "Doomed");
    }
}

mod history_tests {
    use super::*;

    #[test]
    fn every_mutation_appends_an_entry() {
        let db = setup_db();
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());
        let (alice, project) = setup_user(&db, "alice");
        let task = db.create_task(&alice, NewTask::new("Tracked", project.id)).unwrap();

        db.update_task(
            &alice,
            task.id,
            TaskPatch {
                priority: Some(1),
                ..TaskPatch::default()
            },
        )
        .unwrap();
        db.change_status(&alice, task.id, TaskStatus::Done).unwrap();
        // No-op update: nothing changed, nothing logged.
        db.update_task(&alice, task.id, TaskPatch::default()).unwrap();
        db.delete_task(&alice, task.id, &blobs).unwrap();

        let history = db.task_history(&alice, task.id).unwrap();
        let actions: Vec<_> = history.iter().map(|h| h.action).collect();
        assert_eq!(
            actions,
            vec![
                HistoryAction::Deleted,
                HistoryAction::Updated,
                HistoryAction::Updated,
                HistoryAction::Created,
            ]
        );

        let priority_change = &history[2].changes["priority"];
        assert_eq!(priority_change["old"], 3);
        assert_eq!(priority_change["new"], 1);
        assert_eq!(history[1].changes["status"]["new"], "done");
        assert!(history.iter().all(|h| h.changed_by == Some(alice.id)));
    }

    #[test]
    fn failed_history_write_rolls_back_the_task_write() {
        let db = setup_db();
        let (alice, project) = setup_user(&db, "alice");
        let kept = db.create_task(&alice, NewTask::new("Kept", project.id)).unwrap();

        db.with_conn(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER reject_history BEFORE INSERT ON task_history
                 BEGIN SELECT RAISE(ABORT, 'history unavailable'); END;",
            )?;
            Ok(())
        })
        .unwrap();

        assert!(db.create_task(&alice, NewTask::new("Retry me", project.id)).is_err());
        let patch = TaskPatch {
            priority: Some(1),
            ..TaskPatch::default()
        };
        assert!(db.update_task(&alice, kept.id, patch).is_err());

        let titles = list(&db, &alice, TaskQuery::default(), now_ms());
        assert_eq!(titles, vec!["Kept"]);
        assert_eq!(db.get_task(&alice, kept.id).unwrap().unwrap().priority, 3);

        db.with_conn(|conn| {
            conn.execute_batch("DROP TRIGGER reject_history;")?;
            Ok(())
        })
        .unwrap();

        // The failed create left no row behind, so the title is still free.
        db.create_task(&alice, NewTask::new("Retry me", project.id)).unwrap();
    }

    #[test]
    fn history_is_scoped_and_append_only() {
        let db = setup_db();
        let (alice, project) = setup_user(&db, "alice");
        let (bob, _) = setup_user(&db, "bob");
        let task = db.create_task(&alice, NewTask::new("Mine", project.id)).unwrap();

        assert!(db.task_history(&bob, task.id).unwrap().is_empty());
        let page = db.list_history(&alice, None, PageRequest::default()).unwrap();
        assert_eq!(page.total, 1);

        let rewrite = db.with_conn(|conn| {
            conn.execute("UPDATE task_history SET task_title = 'forged'", [])?;
            Ok(())
        });
        assert!(rewrite.is_err());
    }
}

mod comment_tests {
    use super::*;

    #[test]
    fn add_list_edit_delete() {
        let db = setup_db();
        let (alice, project) = setup_user(&db, "alice");
        let task = db.create_task(&alice, NewTask::new("Discuss", project.id)).unwrap();

        let first = db.add_comment(&alice, task.id, "First!").unwrap();
        db.add_comment(&alice, task.id, "Second").unwrap();

        let comments = db.list_comments(&alice, task.id).unwrap();
        let contents: Vec<_> = comments.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["First!", "Second"]);

        let edited = db.update_comment(&alice, first.id, "First, edited").unwrap();
        assert_eq!(edited.content, "First, edited");

        assert!(db.delete_comment(&alice, first.id).unwrap());
        assert_eq!(db.list_comments(&alice, task.id).unwrap().len(), 1);
    }

    #[test]
    fn blank_content_and_foreign_tasks_rejected() {
        let db = setup_db();
        let (alice, project) = setup_user(&db, "alice");
        let (bob, _) = setup_user(&db, "bob");
        let task = db.create_task(&alice, NewTask::new("Quiet", project.id)).unwrap();

        let err = api_error(db.add_comment(&alice, task.id, "   ").unwrap_err());
        assert_eq!(err.code, ErrorCode::MissingRequiredField);

        let err = api_error(db.add_comment(&bob, task.id, "hi").unwrap_err());
        assert_eq!(err.code, ErrorCode::TaskNotFound);
    }
}

mod attachment_tests {
    use super::*;

    #[test]
    fn upload_is_classified_and_sized() {
        let db = setup_db();
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());
        let (alice, project) = setup_user(&db, "alice");
        let task = db.create_task(&alice, NewTask::new("Ship report", project.id)).unwrap();

        let blob = blobs.put("report.PDF", &[0u8; 2048]).unwrap();
        let attachment = db
            .create_attachment(&alice, task.id, &blob, "report.PDF", "Q3 numbers", &blobs)
            .unwrap();

        assert_eq!(attachment.file_type, Some(FileType::Document));
        assert_eq!(attachment.original_name, "report.PDF");
        assert_eq!(attachment.file_size, 2048);
        assert_eq!(attachment.uploaded_by, Some(alice.id));
    }

    #[test]
    fn file_type_is_stable_across_saves() {
        let db = setup_db();
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());
        let (alice, project) = setup_user(&db, "alice");
        let task = db.create_task(&alice, NewTask::new("Pics", project.id)).unwrap();

        let blob = blobs.put("photo.png", b"png-bytes").unwrap();
        let attachment = db
            .create_attachment(&alice, task.id, &blob, "", "", &blobs)
            .unwrap();
        assert_eq!(attachment.file_type, Some(FileType::Image));
        assert_eq!(attachment.original_name, "photo.png");

        // Blob disappears: size drops to 0, type stays.
        std::fs::remove_file(dir.path().join(&blob.name)).unwrap();
        let saved = db
            .update_attachment(&alice, attachment.id, Some("gone".into()), &blobs)
            .unwrap();
        assert_eq!(saved.file_type, Some(FileType::Image));
        assert_eq!(saved.file_size, 0);
        assert_eq!(saved.description, "gone");

        let reread = db.get_attachment(&alice, attachment.id).unwrap().unwrap();
        assert_eq!(reread.file_type, Some(FileType::Image));
    }

    #[test]
    fn delete_survives_missing_blob() {
        let db = setup_db();
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());
        let (alice, project) = setup_user(&db, "alice");
        let task = db.create_task(&alice, NewTask::new("Files", project.id)).unwrap();

        let blob = blobs.put("archive.tar.gz", b"gz").unwrap();
        let attachment = db
            .create_attachment(&alice, task.id, &blob, "archive.tar.gz", "", &blobs)
            .unwrap();
        assert_eq!(attachment.file_type, Some(FileType::Archive));

        blobs.delete(&blob.name).unwrap();
        assert!(db.delete_attachment(&alice, attachment.id, &blobs).unwrap());
        assert!(db.get_attachment(&alice, attachment.id).unwrap().is_none());
    }

    #[test]
    fn listing_is_scoped() {
        let db = setup_db();
        let dir = tempfile::tempdir().unwrap();
        let blobs = FsBlobStore::new(dir.path());
        let (alice, project) = setup_user(&db, "alice");
        let (bob, _) = setup_user(&db, "bob");
        let task = db.create_task(&alice, NewTask::new("Shared?", project.id)).unwrap();
        let blob = blobs.put("a.txt", b"a").unwrap();
        let attachment = db
            .create_attachment(&alice, task.id, &blob, "a.txt", "", &blobs)
            .unwrap();

        let mine = db
            .list_attachments(&alice, Some(task.id), PageRequest::default())
            .unwrap();
        assert_eq!(mine.total, 1);
        let theirs = db.list_attachments(&bob, None, PageRequest::default()).unwrap();
        assert_eq!(theirs.total, 0);
        assert!(db.get_attachment(&bob, attachment.id).unwrap().is_none());

        let err = api_error(
            db.create_attachment(&bob, task.id, &blob, "a.txt", "", &blobs)
                .unwrap_err(),
        );
        assert_eq!(err.code, ErrorCode::TaskNotFound);
    }
}
