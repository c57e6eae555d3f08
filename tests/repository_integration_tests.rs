//! Runs against a real Postgres. Start one, export `DATABASE_URL`, then:
//! `cargo test --test repository_integration_tests -- --ignored`

use chrono::{Duration, Utc};
use stagehouse_cms::{
    models::{CodeCheck, CreateBrandRequest, CreateShowRequest, EmailAddress, RecoveryCode, UpdateShowRequest},
    repository::{ContentRepository, CredentialStore, PostgresRepository},
};
use uuid::Uuid;

// --- Test Context and Setup ---

async fn setup() -> PostgresRepository {
    dotenv::dotenv().ok();
    let db_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set to run integration tests");
    PostgresRepository::open(&db_url, 5)
        .await
        .expect("Failed to open the store for integration tests.")
}

/// A fresh user per test so runs never collide.
async fn create_test_user(repo: &PostgresRepository) -> EmailAddress {
    let email = EmailAddress::parse(&format!("user-{}@stagehouse.test", Uuid::new_v4())).unwrap();
    repo.create_user(&email, "Test User", "editor", "$argon2id$placeholder")
        .await
        .expect("Failed to create test user");
    email
}

fn code_for(email: &EmailAddress, hash: &str, ttl: Duration, attempts: i32) -> RecoveryCode {
    let now = Utc::now();
    RecoveryCode {
        email: email.as_str().to_string(),
        code_hash: hash.to_string(),
        created_at: now,
        expires_at: now + ttl,
        verified_at: None,
        consumed_at: None,
        attempts_remaining: attempts,
    }
}

// --- Credentials ---

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_user_round_trip() {
    let repo = setup().await;
    let email = create_test_user(&repo).await;

    let credential = repo.find_credential(&email).await.unwrap().unwrap();
    assert_eq!(credential.user.email, email.as_str());
    assert_eq!(credential.password_hash, "$argon2id$placeholder");

    let user = repo.get_user(credential.user.id).await.unwrap().unwrap();
    assert_eq!(user.role, "editor");
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_recovery_code_for_unknown_email_is_not_stored() {
    let repo = setup().await;
    let ghost = EmailAddress::parse(&format!("ghost-{}@stagehouse.test", Uuid::new_v4())).unwrap();
    let stored = repo
        .replace_recovery_code(&code_for(&ghost, "h", Duration::minutes(5), 5))
        .await
        .unwrap();
    assert!(!stored);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_replace_supersedes_previous_code() {
    let repo = setup().await;
    let email = create_test_user(&repo).await;
    let now = Utc::now();

    assert!(repo.replace_recovery_code(&code_for(&email, "first", Duration::minutes(5), 5)).await.unwrap());
    assert!(repo.replace_recovery_code(&code_for(&email, "second", Duration::minutes(5), 5)).await.unwrap());

    assert_eq!(
        repo.verify_recovery_code(&email, "first", now).await.unwrap(),
        CodeCheck::Mismatch { attempts_remaining: 4 }
    );
    assert_eq!(
        repo.verify_recovery_code(&email, "second", now).await.unwrap(),
        CodeCheck::Accepted
    );
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_attempts_run_out() {
    let repo = setup().await;
    let email = create_test_user(&repo).await;
    repo.replace_recovery_code(&code_for(&email, "right", Duration::minutes(5), 2))
        .await
        .unwrap();
    let now = Utc::now();

    assert_eq!(
        repo.verify_recovery_code(&email, "wrong", now).await.unwrap(),
        CodeCheck::Mismatch { attempts_remaining: 1 }
    );
    assert_eq!(
        repo.verify_recovery_code(&email, "wrong", now).await.unwrap(),
        CodeCheck::Mismatch { attempts_remaining: 0 }
    );
    assert_eq!(
        repo.verify_recovery_code(&email, "right", now).await.unwrap(),
        CodeCheck::NoActiveCode
    );
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_expired_code_is_inactive() {
    let repo = setup().await;
    let email = create_test_user(&repo).await;
    repo.replace_recovery_code(&code_for(&email, "right", Duration::seconds(-1), 5))
        .await
        .unwrap();

    assert_eq!(
        repo.verify_recovery_code(&email, "right", Utc::now()).await.unwrap(),
        CodeCheck::NoActiveCode
    );
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_redeem_consumes_once_and_replaces_hash() {
    let repo = setup().await;
    let email = create_test_user(&repo).await;
    repo.replace_recovery_code(&code_for(&email, "right", Duration::minutes(5), 5))
        .await
        .unwrap();
    let now = Utc::now();

    assert_eq!(
        repo.redeem_recovery_code(&email, "right", "$argon2id$new", now).await.unwrap(),
        CodeCheck::Accepted
    );
    let credential = repo.find_credential(&email).await.unwrap().unwrap();
    assert_eq!(credential.password_hash, "$argon2id$new");

    assert_eq!(
        repo.redeem_recovery_code(&email, "right", "$argon2id$again", now).await.unwrap(),
        CodeCheck::NoActiveCode
    );
    let credential = repo.find_credential(&email).await.unwrap().unwrap();
    assert_eq!(credential.password_hash, "$argon2id$new");
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_redeems_have_one_winner() {
    let repo = setup().await;
    let email = create_test_user(&repo).await;
    repo.replace_recovery_code(&code_for(&email, "right", Duration::minutes(5), 5))
        .await
        .unwrap();
    let now = Utc::now();

    let (a, b) = tokio::join!(
        repo.redeem_recovery_code(&email, "right", "$argon2id$a", now),
        repo.redeem_recovery_code(&email, "right", "$argon2id$b", now),
    );
    let winners = [a.unwrap(), b.unwrap()]
        .into_iter()
        .filter(|check| *check == CodeCheck::Accepted)
        .count();
    assert_eq!(winners, 1);
}

// --- Content ---

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_show_lifecycle() {
    let repo = setup().await;

    let show = repo
        .create_show(CreateShowRequest {
            title: "Integration Show".into(),
            venue: "Test Hall".into(),
            starts_at: Utc::now() + Duration::days(7),
            description: Some("desc".into()),
            is_featured: false,
        })
        .await
        .unwrap();

    let updated = repo
        .update_show(
            show.id,
            UpdateShowRequest {
                is_featured: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert!(updated.is_featured);
    assert_eq!(updated.title, "Integration Show");
    assert_eq!(updated.description.as_deref(), Some("desc"));

    assert!(repo.list_shows().await.unwrap().iter().any(|s| s.id == show.id));
    assert!(repo.delete_show(show.id).await.unwrap());
    assert!(repo.get_show(show.id).await.unwrap().is_none());
    assert!(!repo.delete_show(show.id).await.unwrap());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_brand_lifecycle() {
    let repo = setup().await;
    let brand = repo
        .create_brand(CreateBrandRequest {
            name: format!("Brand {}", Uuid::new_v4()),
            website: None,
        })
        .await
        .unwrap();

    assert!(repo.list_brands().await.unwrap().iter().any(|b| b.id == brand.id));
    assert!(repo.delete_brand(brand.id).await.unwrap());
}
