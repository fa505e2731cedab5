use std::collections::BTreeSet;
use std::sync::Arc;
use user_policy::{
    AccessControlledUserStore, Authority, InMemoryUserStore, Principal, SecurityContext,
    ServiceError,
    config::HashingConfig,
    models::{
        CustomerPatch, EmployeePatch, NewCustomer, NewEmployee, PageRequest, ProfilePatch, User,
        UserCriteria, UserKind,
    },
    password::PasswordService,
    security::RoleRegistry,
};

// --- Test Context ---

const PASSWORD: &str = "987654321";

fn setup() -> (Arc<InMemoryUserStore>, AccessControlledUserStore) {
    let store = Arc::new(InMemoryUserStore::new());
    let passwords = PasswordService::new(&HashingConfig::default()).unwrap();
    let service = AccessControlledUserStore::new(store.clone(), RoleRegistry::default(), passwords);
    (store, service)
}

fn ctx(identity: &str, authorities: &[Authority]) -> SecurityContext {
    SecurityContext::authenticated(Principal::new(identity, authorities.iter().copied()))
}

fn admin() -> SecurityContext {
    ctx("admin@test.com", &Authority::ALL)
}

fn self_only(identity: &str) -> SecurityContext {
    ctx(identity, &[Authority::UserReadSelf, Authority::UserUpdateSelf])
}

async fn customer(service: &AccessControlledUserStore, email: &str) -> User {
    let user = service
        .add_customer(NewCustomer {
            email: email.to_string(),
            password: PASSWORD.to_string(),
            username: email.split('@').next().unwrap().to_string(),
            ..NewCustomer::default()
        })
        .await
        .unwrap();
    service.grant_user_role(user.id).await.unwrap();
    service.enable_user(user.id).await.unwrap()
}

async fn employee(service: &AccessControlledUserStore, email: &str) -> User {
    let user = service
        .add_employee(
            &admin(),
            NewEmployee {
                email: email.to_string(),
                password: PASSWORD.to_string(),
                username: "staff".to_string(),
                ..NewEmployee::default()
            },
        )
        .await
        .unwrap();
    service.enable_user(user.id).await.unwrap()
}

// --- Unauthenticated callers ---

#[tokio::test]
async fn test_anonymous_caller_never_reaches_the_store() {
    let (store, service) = setup();
    let target = customer(&service, "foo@test.com").await;
    let anon = SecurityContext::anonymous();
    let before = store.calls();

    let results = vec![
        service.get_user(&anon, target.id).await.map(|_| ()),
        service.get_user_by_email(&anon, "foo@test.com").await.map(|_| ()),
        service
            .merge_employee(&anon, "foo@test.com", EmployeePatch::default())
            .await
            .map(|_| ()),
        service.delete_user(&anon, target.id).await,
        service.disable_user(&anon, target.id).await.map(|_| ()),
        service
            .grant_roles(&anon, target.id, &["USER".to_string()])
            .await
            .map(|_| ()),
        service
            .change_password(&anon, "foo@test.com", "new-password")
            .await
            .map(|_| ()),
        service
            .get_user_pager(&anon, UserCriteria::default(), PageRequest::default())
            .await
            .map(|_| ()),
        service
            .get_user_page(&anon, UserCriteria::default(), PageRequest::default())
            .await
            .map(|_| ()),
        service
            .get_page_by_roles(
                &anon,
                None,
                BTreeSet::from(["USER".to_string()]),
                PageRequest::default(),
            )
            .await
            .map(|_| ()),
        service
            .merge_customer(&anon, "foo@test.com", CustomerPatch::default())
            .await
            .map(|_| ()),
        service
            .update_icon_src(&anon, target.id, "https://cdn/foo.png".to_string())
            .await
            .map(|_| ()),
        service
            .update_icon(&anon, target.id, vec![0x89, 0x50])
            .await
            .map(|_| ()),
        service.set_public_key(&anon, "ssh-ed25519 AAAA".to_string()).await.map(|_| ()),
        service.clear_public_key(&anon).await.map(|_| ()),
        service.get_roles(&anon).await.map(|_| ()),
        service
            .add_employee(&anon, NewEmployee::default())
            .await
            .map(|_| ()),
    ];

    for result in results {
        assert!(matches!(result, Err(ServiceError::Unauthenticated)), "{result:?}");
    }
    assert_eq!(store.calls(), before, "store must not be touched");
}

// --- Post-checked reads ---

#[tokio::test]
async fn test_read_self_only_sees_own_record() {
    let (store, service) = setup();
    let foo = customer(&service, "foo@test.com").await;
    let bar = customer(&service, "bar@test.com").await;
    let caller = self_only("foo@test.com");

    let own = service.get_user(&caller, foo.id).await.unwrap();
    assert_eq!(own.email, "foo@test.com");

    let before = store.calls();
    let other = service.get_user(&caller, bar.id).await;
    assert!(matches!(other, Err(ServiceError::AccessDenied { .. })));
    assert!(store.calls() > before, "the record is loaded before the check");
}

#[tokio::test]
async fn test_read_self_by_email_is_post_checked() {
    let (_store, service) = setup();
    customer(&service, "foo@test.com").await;
    customer(&service, "bar@test.com").await;
    let caller = self_only("foo@test.com");

    assert!(service.get_user_by_email(&caller, "foo@test.com").await.is_ok());
    assert!(matches!(
        service.get_user_by_email(&caller, "bar@test.com").await,
        Err(ServiceError::AccessDenied { .. })
    ));
}

#[tokio::test]
async fn test_read_all_sees_everyone() {
    let (_store, service) = setup();
    let bar = customer(&service, "bar@test.com").await;
    let staff = ctx("staff@test.com", &[Authority::UserReadAll]);

    assert_eq!(service.get_user(&staff, bar.id).await.unwrap().id, bar.id);
}

#[tokio::test]
async fn test_missing_id_is_only_revealed_to_read_all() {
    let (_store, service) = setup();
    customer(&service, "foo@test.com").await;

    assert!(matches!(
        service.get_user(&admin(), 999).await,
        Err(ServiceError::NotFound { .. })
    ));
    assert!(matches!(
        service.get_user(&self_only("foo@test.com"), 999).await,
        Err(ServiceError::AccessDenied { .. })
    ));
}

#[tokio::test]
async fn test_invalid_id_is_a_validation_error() {
    let (_store, service) = setup();
    assert!(matches!(
        service.get_user(&admin(), 0).await,
        Err(ServiceError::ValidationFailed { .. })
    ));
}

// --- Passwords ---

#[tokio::test]
async fn test_change_password_is_self_service_only() {
    let (_store, service) = setup();
    customer(&service, "foo@test.com").await;
    customer(&service, "bar@test.com").await;

    // Even an admin cannot change someone else's password this way.
    let denied = service
        .change_password(&admin(), "foo@test.com", "new-password")
        .await;
    assert!(matches!(denied, Err(ServiceError::AccessDenied { .. })));

    let denied = service
        .change_password(&self_only("bar@test.com"), "foo@test.com", "new-password")
        .await;
    assert!(matches!(denied, Err(ServiceError::AccessDenied { .. })));
    assert!(service.authenticate("foo@test.com", PASSWORD).await.is_ok());

    service
        .change_password(&self_only("foo@test.com"), "foo@test.com", "new-password")
        .await
        .unwrap();
    assert!(matches!(
        service.authenticate("foo@test.com", PASSWORD).await,
        Err(ServiceError::AuthenticationFailed)
    ));
    assert!(service.authenticate("foo@test.com", "new-password").await.is_ok());
}

#[tokio::test]
async fn test_change_password_by_email_skips_caller_check() {
    let (_store, service) = setup();
    customer(&service, "foo@test.com").await;

    service
        .change_password_by_email("foo@test.com", "reset-password")
        .await
        .unwrap();
    assert!(service.authenticate("foo@test.com", "reset-password").await.is_ok());
}

#[tokio::test]
async fn test_weak_password_is_rejected() {
    let (_store, service) = setup();
    customer(&service, "foo@test.com").await;

    let result = service
        .change_password(&self_only("foo@test.com"), "foo@test.com", "has space")
        .await;
    assert!(matches!(result, Err(ServiceError::ValidationFailed { .. })));
}

// --- Authentication ---

#[tokio::test]
async fn test_authenticate_yields_role_authorities() {
    let (_store, service) = setup();
    customer(&service, "foo@test.com").await;

    let principal = service.authenticate("FOO@test.com", PASSWORD).await.unwrap();
    assert_eq!(principal.identity(), "foo@test.com");
    assert!(principal.has_authority(Authority::UserReadSelf));
    assert!(!principal.has_authority(Authority::UserReadAll));
}

#[tokio::test]
async fn test_disabled_accounts_cannot_authenticate() {
    let (_store, service) = setup();
    let foo = customer(&service, "foo@test.com").await;
    service.disable_user(&admin(), foo.id).await.unwrap();

    assert!(matches!(
        service.authenticate("foo@test.com", PASSWORD).await,
        Err(ServiceError::AuthenticationFailed)
    ));
    assert!(matches!(
        service.resolve_principal("foo@test.com").await,
        Err(ServiceError::Unauthenticated)
    ));
}

#[tokio::test]
async fn test_unknown_email_and_wrong_password_look_the_same() {
    let (_store, service) = setup();
    customer(&service, "foo@test.com").await;

    let unknown = service.authenticate("nobody@test.com", PASSWORD).await;
    let wrong = service.authenticate("foo@test.com", "not-it").await;
    assert!(matches!(unknown, Err(ServiceError::AuthenticationFailed)));
    assert!(matches!(wrong, Err(ServiceError::AuthenticationFailed)));
}

// --- Creation & administration ---

#[tokio::test]
async fn test_new_accounts_start_disabled() {
    let (_store, service) = setup();
    let created = service
        .add_customer(NewCustomer {
            email: "New@Test.com".to_string(),
            password: PASSWORD.to_string(),
            username: "new".to_string(),
            affiliation: Some("ACME".to_string()),
            ..NewCustomer::default()
        })
        .await
        .unwrap();

    assert!(!created.enabled);
    assert!(created.roles.is_empty());
    assert_eq!(created.email, "new@test.com");

    let granted = service.grant_user_role(created.id).await.unwrap();
    assert_eq!(granted.roles, BTreeSet::from(["USER".to_string()]));
}

#[tokio::test]
async fn test_add_employee_requires_create_special() {
    let (_store, service) = setup();
    let input = NewEmployee {
        email: "staff@test.com".to_string(),
        password: PASSWORD.to_string(),
        username: "staff".to_string(),
        ..NewEmployee::default()
    };

    let denied = service
        .add_employee(&self_only("foo@test.com"), input.clone())
        .await;
    assert!(matches!(denied, Err(ServiceError::AccessDenied { .. })));

    let manager = ctx("manager@test.com", &[Authority::UserCreateSpecial]);
    let created = service.add_employee(&manager, input).await.unwrap();
    assert_eq!(created.roles, BTreeSet::from(["EMPLOYEE".to_string()]));
}

#[tokio::test]
async fn test_duplicate_email_is_rejected() {
    let (_store, service) = setup();
    customer(&service, "foo@test.com").await;

    let duplicate = service
        .add_customer(NewCustomer {
            email: "FOO@test.com".to_string(),
            password: PASSWORD.to_string(),
            username: "again".to_string(),
            ..NewCustomer::default()
        })
        .await;
    assert!(matches!(duplicate, Err(ServiceError::ValidationFailed { .. })));
}

#[tokio::test]
async fn test_malformed_email_is_rejected() {
    let (store, service) = setup();
    let result = service
        .add_customer(NewCustomer {
            email: "not-an-email".to_string(),
            password: PASSWORD.to_string(),
            username: "x".to_string(),
            ..NewCustomer::default()
        })
        .await;
    assert!(matches!(result, Err(ServiceError::ValidationFailed { .. })));
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn test_grant_roles_replaces_and_validates() {
    let (_store, service) = setup();
    let foo = customer(&service, "foo@test.com").await;

    let updated = service
        .grant_roles(&admin(), foo.id, &["MANAGER".to_string(), "USER".to_string()])
        .await
        .unwrap();
    assert_eq!(
        updated.roles,
        BTreeSet::from(["MANAGER".to_string(), "USER".to_string()])
    );

    let typo = service
        .grant_roles(&admin(), foo.id, &["ADMNI".to_string()])
        .await;
    assert!(matches!(typo, Err(ServiceError::ValidationFailed { .. })));

    let denied = service
        .grant_roles(&self_only("foo@test.com"), foo.id, &["ADMIN".to_string()])
        .await;
    assert!(matches!(denied, Err(ServiceError::AccessDenied { .. })));
}

#[tokio::test]
async fn test_delete_requires_authority_and_reports_missing() {
    let (_store, service) = setup();
    let foo = customer(&service, "foo@test.com").await;

    let denied = service.delete_user(&self_only("foo@test.com"), foo.id).await;
    assert!(matches!(denied, Err(ServiceError::AccessDenied { .. })));

    service.delete_user(&admin(), foo.id).await.unwrap();
    assert!(matches!(
        service.delete_user(&admin(), foo.id).await,
        Err(ServiceError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_provision_admin_is_idempotent() {
    let (_store, service) = setup();
    let first = service.provision_admin("root@test.com", PASSWORD).await.unwrap();
    let second = service.provision_admin("root@test.com", "ignored").await.unwrap();

    assert_eq!(first.id, second.id);
    assert!(first.enabled);
    let principal = service.authenticate("root@test.com", PASSWORD).await.unwrap();
    assert!(principal.has_authority(Authority::UserDelete));
}

// --- Merges ---

#[tokio::test]
async fn test_merge_requires_update_permission() {
    let (_store, service) = setup();
    employee(&service, "staff@test.com").await;
    let patch = EmployeePatch {
        profile: ProfilePatch {
            description: Some("hacked".to_string()),
            ..ProfilePatch::default()
        },
        roles: None,
    };

    let denied = service
        .merge_employee(&self_only("foo@test.com"), "staff@test.com", patch.clone())
        .await;
    assert!(matches!(denied, Err(ServiceError::AccessDenied { .. })));

    let merged = service
        .merge_employee(&self_only("staff@test.com"), "staff@test.com", patch)
        .await
        .unwrap();
    assert_eq!(merged.description.as_deref(), Some("hacked"));
}

#[tokio::test]
async fn test_role_change_through_merge_needs_grant_roles() {
    let (_store, service) = setup();
    customer(&service, "foo@test.com").await;
    let escalate = CustomerPatch {
        roles: Some(BTreeSet::from(["ADMIN".to_string()])),
        ..CustomerPatch::default()
    };

    let denied = service
        .merge_customer(&self_only("foo@test.com"), "foo@test.com", escalate.clone())
        .await;
    assert!(matches!(denied, Err(ServiceError::AccessDenied { .. })));

    let merged = service
        .merge_customer(&admin(), "foo@test.com", escalate)
        .await
        .unwrap();
    assert_eq!(merged.roles, BTreeSet::from(["ADMIN".to_string()]));

    // An empty set is not a role change and needs no grant authority.
    let untouched = service
        .merge_customer(
            &self_only("foo@test.com"),
            "foo@test.com",
            CustomerPatch {
                roles: Some(BTreeSet::new()),
                title: Some("Dr".to_string()),
                ..CustomerPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(untouched.roles, BTreeSet::from(["ADMIN".to_string()]));
    assert!(matches!(
        untouched.kind,
        UserKind::Customer { title: Some(ref t), .. } if t == "Dr"
    ));
}

#[tokio::test]
async fn test_merge_kind_mismatch_is_rejected() {
    let (_store, service) = setup();
    customer(&service, "foo@test.com").await;
    employee(&service, "staff@test.com").await;

    assert!(matches!(
        service
            .merge_employee(&admin(), "foo@test.com", EmployeePatch::default())
            .await,
        Err(ServiceError::ValidationFailed { .. })
    ));
    assert!(matches!(
        service
            .merge_customer(&admin(), "staff@test.com", CustomerPatch::default())
            .await,
        Err(ServiceError::ValidationFailed { .. })
    ));
}

// --- Public keys ---

#[tokio::test]
async fn test_public_key_targets_the_caller() {
    let (_store, service) = setup();
    customer(&service, "foo@test.com").await;
    let caller = self_only("foo@test.com");

    let with_key = service
        .set_public_key(&caller, "ssh-ed25519 AAAA".to_string())
        .await
        .unwrap();
    assert_eq!(with_key.public_key.as_deref(), Some("ssh-ed25519 AAAA"));

    assert!(matches!(
        service.set_public_key(&caller, "  ".to_string()).await,
        Err(ServiceError::ValidationFailed { .. })
    ));

    let cleared = service.clear_public_key(&caller).await.unwrap();
    assert!(cleared.public_key.is_none());
}
