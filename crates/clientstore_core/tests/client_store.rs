use clientstore_core::db::open_db_in_memory;
use clientstore_core::{
    AggregateFailurePolicy, Client, ClientRepository, ErrorStatus, SqliteClientRepository,
    StoreErrorKind,
};
use rusqlite::Connection;
use std::collections::HashSet;

fn add_organization(conn: &Connection, name: &str) {
    conn.execute("INSERT INTO organizations (name) VALUES (?1);", [name])
        .unwrap();
}

fn add_user(conn: &Connection, name: &str) {
    conn.execute("INSERT INTO users (name) VALUES (?1);", [name])
        .unwrap();
}

fn full_client(name: &str) -> Client {
    let mut client = Client::new(name, "default");
    client.node_name = format!("{name}-node");
    client.validator = true;
    client.admin = true;
    client.public_key = "-----BEGIN PUBLIC KEY-----\nMIIB\n-----END PUBLIC KEY-----".to_string();
    client.certificate = Some("-----BEGIN CERTIFICATE-----\nMIIC\n".to_string());
    client
}

#[test]
fn merge_then_fetch_returns_identical_fields() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteClientRepository::try_new(&conn).unwrap();

    let client = full_client("chef-validator");
    repo.merge(&client).unwrap();

    assert_eq!(repo.fetch("chef-validator").unwrap(), client);
}

#[test]
fn merge_keeps_missing_certificate_as_none() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteClientRepository::try_new(&conn).unwrap();

    let client = Client::new("web01", "default");
    repo.merge(&client).unwrap();

    let loaded = repo.fetch("web01").unwrap();
    assert_eq!(loaded.certificate, None);
    assert_eq!(loaded.node_name, "web01");
}

#[test]
fn merge_existing_name_in_same_organization_replaces_row() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteClientRepository::try_new(&conn).unwrap();

    let mut client = Client::new("db01", "default");
    repo.merge(&client).unwrap();

    client.admin = true;
    client.public_key = "rotated".to_string();
    client.certificate = Some("cert".to_string());
    repo.merge(&client).unwrap();

    assert_eq!(repo.fetch("db01").unwrap(), client);
    assert_eq!(repo.list_names().unwrap(), vec!["db01".to_string()]);
}

#[test]
fn merge_into_other_organization_conflicts_and_keeps_row() {
    let conn = open_db_in_memory().unwrap();
    add_organization(&conn, "other");
    let repo = SqliteClientRepository::try_new(&conn).unwrap();

    let original = Client::new("node1.example.com", "default");
    repo.merge(&original).unwrap();

    let loaded = repo.fetch("node1.example.com").unwrap();
    assert!(!loaded.validator);
    assert!(!loaded.admin);
    assert_eq!(loaded.organization, "default");

    let mut moved = Client::new("node1.example.com", "other");
    moved.admin = true;
    let err = repo.merge(&moved).unwrap_err();
    assert_eq!(err.status(), ErrorStatus::Conflict);
    assert_eq!(err.status().http_code(), 409);

    assert_eq!(repo.fetch("node1.example.com").unwrap(), original);

    // The failed transaction must not linger.
    repo.merge(&Client::new("node2.example.com", "other")).unwrap();
    assert_eq!(
        repo.fetch("node2.example.com").unwrap().organization,
        "other"
    );
}

#[test]
fn merge_into_unknown_organization_still_reports_name_conflict() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteClientRepository::try_new(&conn).unwrap();

    let original = Client::new("node1.example.com", "default");
    repo.merge(&original).unwrap();

    let err = repo
        .merge(&Client::new("node1.example.com", "other"))
        .unwrap_err();
    assert_eq!(err.status(), ErrorStatus::Conflict);
    assert_eq!(repo.fetch("node1.example.com").unwrap(), original);
}

#[test]
fn merge_name_owned_by_user_conflicts() {
    let conn = open_db_in_memory().unwrap();
    add_user(&conn, "pivotal");
    let repo = SqliteClientRepository::try_new(&conn).unwrap();

    let err = repo.merge(&Client::new("pivotal", "default")).unwrap_err();
    assert!(err.is_conflict());
    assert!(err.to_string().starts_with("a user with"));
    assert!(repo.fetch("pivotal").unwrap_err().is_not_found());
}

#[test]
fn merge_with_unknown_organization_is_internal_error() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteClientRepository::try_new(&conn).unwrap();

    let err = repo
        .merge(&Client::new("orphan", "no-such-org"))
        .unwrap_err();
    assert_eq!(err.status(), ErrorStatus::Internal);
    assert!(matches!(err.kind(), StoreErrorKind::Backend(_)));
    assert!(repo.list_names().unwrap().is_empty());
}

#[test]
fn fetch_missing_client_is_not_found() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteClientRepository::try_new(&conn).unwrap();

    let err = repo.fetch("ghost").unwrap_err();
    assert_eq!(err.status().http_code(), 404);
    assert!(matches!(err.kind(), StoreErrorKind::NotFound(name) if name == "ghost"));
}

#[test]
fn rename_to_fresh_name_moves_identity() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteClientRepository::try_new(&conn).unwrap();

    let client = full_client("old-name");
    repo.merge(&client).unwrap();
    repo.rename(&client, "new-name").unwrap();

    assert!(repo.fetch("old-name").unwrap_err().is_not_found());
    let renamed = repo.fetch("new-name").unwrap();
    assert_eq!(
        renamed,
        Client {
            name: "new-name".to_string(),
            ..client
        }
    );
}

#[test]
fn rename_onto_existing_client_conflicts() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteClientRepository::try_new(&conn).unwrap();

    let first = Client::new("alpha", "default");
    let second = Client::new("beta", "default");
    repo.merge(&first).unwrap();
    repo.merge(&second).unwrap();

    let err = repo.rename(&first, "beta").unwrap_err();
    assert_eq!(err.status(), ErrorStatus::Conflict);
    assert!(err.to_string().contains("already exists, cannot rename"));

    assert_eq!(repo.fetch("alpha").unwrap(), first);
    assert_eq!(repo.fetch("beta").unwrap(), second);
}

#[test]
fn rename_onto_user_name_conflicts() {
    let conn = open_db_in_memory().unwrap();
    add_user(&conn, "admin-user");
    let repo = SqliteClientRepository::try_new(&conn).unwrap();

    let client = Client::new("gamma", "default");
    repo.merge(&client).unwrap();

    let err = repo.rename(&client, "admin-user").unwrap_err();
    assert!(err.is_conflict());
    assert!(repo.fetch("gamma").is_ok());
}

#[test]
fn rename_missing_client_is_a_noop() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteClientRepository::try_new(&conn).unwrap();
    repo.merge(&Client::new("bystander", "default")).unwrap();

    repo.rename(&Client::new("ghost", "default"), "spirit")
        .unwrap();

    assert_eq!(repo.list_names().unwrap(), vec!["bystander".to_string()]);
    assert!(repo.fetch("spirit").unwrap_err().is_not_found());
}

#[test]
fn delete_removes_row_and_tolerates_missing_name() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteClientRepository::try_new(&conn).unwrap();

    let client = Client::new("temp", "default");
    repo.merge(&client).unwrap();
    repo.delete(&client).unwrap();

    assert!(repo.fetch("temp").unwrap_err().is_not_found());
    repo.delete(&client).unwrap();
    repo.delete(&Client::new("never-existed", "default")).unwrap();
}

#[test]
fn count_admins_tracks_admin_flag() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteClientRepository::try_new(&conn).unwrap();
    assert_eq!(repo.count_admins().unwrap(), 0);

    repo.merge(&Client::new("plain", "default")).unwrap();
    assert_eq!(repo.count_admins().unwrap(), 0);

    let mut admin = Client::new("admin-1", "default");
    admin.admin = true;
    repo.merge(&admin).unwrap();
    assert_eq!(repo.count_admins().unwrap(), 1);

    for name in ["admin-2", "admin-3", "admin-4"] {
        let mut client = Client::new(name, "default");
        client.admin = true;
        repo.merge(&client).unwrap();
    }
    assert_eq!(repo.count_admins().unwrap(), 4);

    admin.admin = false;
    repo.merge(&admin).unwrap();
    assert_eq!(repo.count_admins().unwrap(), 3);
}

#[test]
fn list_names_is_empty_then_matches_inserted_set() {
    let conn = open_db_in_memory().unwrap();
    add_organization(&conn, "other");
    let repo = SqliteClientRepository::try_new(&conn).unwrap();
    assert!(repo.list_names().unwrap().is_empty());

    repo.merge(&Client::new("a", "default")).unwrap();
    repo.merge(&Client::new("b", "other")).unwrap();
    repo.merge(&Client::new("c", "default")).unwrap();

    let names: HashSet<String> = repo.list_names().unwrap().into_iter().collect();
    let expected: HashSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
    assert_eq!(names, expected);
}

#[test]
fn aggregate_failures_propagate_by_default() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteClientRepository::try_new(&conn).unwrap();
    assert_eq!(repo.aggregate_failure(), AggregateFailurePolicy::Propagate);

    conn.execute_batch("DROP TABLE clients;").unwrap();

    let count_err = repo.count_admins().unwrap_err();
    assert_eq!(count_err.status(), ErrorStatus::Internal);
    let list_err = repo.list_names().unwrap_err();
    assert!(matches!(list_err.kind(), StoreErrorKind::Backend(_)));
}

#[test]
fn repositories_share_one_connection() {
    let conn = open_db_in_memory().unwrap();
    let writer = SqliteClientRepository::try_new(&conn).unwrap();
    let reader = SqliteClientRepository::try_new(&conn)
        .unwrap()
        .with_aggregate_failure(AggregateFailurePolicy::Propagate);

    writer.merge(&Client::new("shared", "default")).unwrap();
    assert_eq!(reader.fetch("shared").unwrap().name, "shared");
}
