//! Service-level tests against a real database. Each test provisions its own
//! tenant and users and skips when `DATABASE_URL` is unset.

mod common;

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use eventdesk::config;
use eventdesk::database::models::{Tenant, User};
use eventdesk::services::attachment_service::NewUpload;
use eventdesk::services::chat_service::{MessageQuery, PostMessageRequest};
use eventdesk::services::department_service::{
    AddDepartmentMemberRequest, CreateDepartmentRequest, UpdateDepartmentMemberRequest,
};
use eventdesk::services::event_service::CreateEventRequest;
use eventdesk::services::feedback_service::SubmitFeedbackRequest;
use eventdesk::services::member_service::{AddMemberRequest, UpdateMemberRequest};
use eventdesk::services::rbac_service::{ADMIN_ROLE, MEMBER_ROLE};
use eventdesk::services::tenant_service::CreateTenantRequest;
use eventdesk::services::user_service::RegisterRequest;
use eventdesk::services::venue_service::CreateVenueRequest;
use eventdesk::services::{
    AccessContext, AttachmentService, ChatService, DepartmentService, EventService, FeedbackService, MemberService,
    RbacService, ServiceError, TenantService, UserService, VenueService,
};
use eventdesk::storage::{FilesystemBackend, StorageBackend};
use eventdesk::types::{DepartmentRole, EventStatus, OwnerType};

struct Fixture {
    pool: PgPool,
    tenant: Tenant,
    owner: AccessContext,
}

impl Fixture {
    async fn new(pool: PgPool) -> Result<Self> {
        let owner = create_user(&pool, "owner").await?;
        let tenant = TenantService::new(pool.clone())
            .create(
                owner.id,
                &CreateTenantRequest {
                    name: "Acme Events".to_string(),
                    slug: Some(common::unique("acme")),
                },
            )
            .await?;
        let owner = RbacService::new(pool.clone())
            .load_access(tenant.id, owner.id, &owner.email)
            .await?;
        Ok(Self { pool, tenant, owner })
    }

    /// A second account added to the tenant with the default member role.
    async fn add_member(&self, label: &str) -> Result<AccessContext> {
        let user = create_user(&self.pool, label).await?;
        MemberService::new(self.pool.clone())
            .add(
                &self.owner,
                &AddMemberRequest {
                    email: user.email.clone(),
                    role_id: None,
                },
            )
            .await?;
        Ok(RbacService::new(self.pool.clone())
            .load_access(self.tenant.id, user.id, &user.email)
            .await?)
    }

    async fn event(&self, status: EventStatus) -> Result<Uuid> {
        let events = EventService::new(self.pool.clone());
        let starts_at = Utc::now() + Duration::days(30);
        let event = events
            .create(
                &self.owner,
                &CreateEventRequest {
                    name: "Summer Gala".to_string(),
                    description: None,
                    venue_id: None,
                    starts_at,
                    ends_at: starts_at + Duration::hours(4),
                },
            )
            .await?;
        if status != EventStatus::Draft {
            events.change_status(&self.owner, event.id, EventStatus::Published).await?;
        }
        if status == EventStatus::Completed {
            events.change_status(&self.owner, event.id, EventStatus::Completed).await?;
        }
        Ok(event.id)
    }

    async fn department(&self) -> Result<Uuid> {
        let department = DepartmentService::new(self.pool.clone())
            .create(
                &self.owner,
                &CreateDepartmentRequest {
                    name: common::unique("logistics"),
                    description: None,
                    event_id: None,
                },
            )
            .await?;
        Ok(department.id)
    }
}

async fn create_user(pool: &PgPool, label: &str) -> Result<User> {
    let user = UserService::new(pool.clone())
        .create_user(&RegisterRequest {
            email: format!("{}@eventdesk.test", common::unique(label)),
            name: label.to_string(),
            password: "correct horse battery".to_string(),
        })
        .await?;
    Ok(user)
}

#[tokio::test]
async fn tenant_is_provisioned_with_modules_roles_and_owner() -> Result<()> {
    let Some(pool) = common::test_pool(5).await? else {
        return Ok(());
    };
    let fx = Fixture::new(pool.clone()).await?;
    let rbac = RbacService::new(pool);

    assert!(fx.owner.is_owner());
    assert_eq!(fx.owner.role_name.as_deref(), Some(ADMIN_ROLE));

    let modules = rbac.list_modules(&fx.owner).await?;
    assert!(!modules.is_empty());
    assert!(modules.iter().all(|m| m.enabled), "every module starts enabled");

    let roles = rbac.list_roles(&fx.owner).await?;
    let names: Vec<&str> = roles.iter().map(|r| r.role.name.as_str()).collect();
    assert!(names.contains(&ADMIN_ROLE));
    assert!(names.contains(&MEMBER_ROLE));
    Ok(())
}

#[tokio::test]
async fn duplicate_tenant_slug_conflicts() -> Result<()> {
    let Some(pool) = common::test_pool(5).await? else {
        return Ok(());
    };
    let fx = Fixture::new(pool.clone()).await?;

    let err = TenantService::new(pool)
        .create(
            fx.owner.user_id,
            &CreateTenantRequest {
                name: "Copycat".to_string(),
                slug: Some(fx.tenant.slug.clone()),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)), "{:?}", err);
    Ok(())
}

#[tokio::test]
async fn assigned_role_cannot_be_deleted() -> Result<()> {
    let Some(pool) = common::test_pool(5).await? else {
        return Ok(());
    };
    let fx = Fixture::new(pool.clone()).await?;
    fx.add_member("crew").await?;
    let rbac = RbacService::new(pool);

    let roles = rbac.list_roles(&fx.owner).await?;
    let member_role = roles
        .iter()
        .find(|r| r.role.name == MEMBER_ROLE)
        .map(|r| r.role.id)
        .unwrap();

    let err = rbac.delete_role(&fx.owner, member_role).await.unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)), "{:?}", err);

    // An unassigned role goes away cleanly
    let spare = rbac.create_role(&fx.owner, "Volunteers", None, &[]).await?;
    rbac.delete_role(&fx.owner, spare.role.id).await?;
    Ok(())
}

#[tokio::test]
async fn unknown_permission_key_is_unprocessable() -> Result<()> {
    let Some(pool) = common::test_pool(5).await? else {
        return Ok(());
    };
    let fx = Fixture::new(pool.clone()).await?;
    let rbac = RbacService::new(pool);

    let err = rbac
        .create_role(
            &fx.owner,
            "Ushers",
            None,
            &["events.read".to_string(), "events.teleport".to_string()],
        )
        .await
        .unwrap_err();
    match err {
        ServiceError::Unprocessable(msg) => assert!(msg.contains("events.teleport"), "{}", msg),
        other => panic!("expected 422, got {:?}", other),
    }

    // The failed create must not leave a half-made role behind
    let roles = rbac.list_roles(&fx.owner).await?;
    assert!(roles.iter().all(|r| r.role.name != "Ushers"));
    Ok(())
}

#[tokio::test]
async fn venue_used_by_event_cannot_be_deleted() -> Result<()> {
    let Some(pool) = common::test_pool(5).await? else {
        return Ok(());
    };
    let fx = Fixture::new(pool.clone()).await?;
    let venues = VenueService::new(pool.clone());
    let events = EventService::new(pool);

    let venue = venues
        .create(
            &fx.owner,
            &CreateVenueRequest {
                name: "Harbour Hall".to_string(),
                address: None,
                city: Some("Oslo".to_string()),
                capacity: Some(300),
                notes: None,
            },
        )
        .await?;
    let starts_at = Utc::now() + Duration::days(10);
    let event = events
        .create(
            &fx.owner,
            &CreateEventRequest {
                name: "Launch".to_string(),
                description: None,
                venue_id: Some(venue.id),
                starts_at,
                ends_at: starts_at + Duration::hours(2),
            },
        )
        .await?;

    let err = venues.delete(&fx.owner, venue.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)), "{:?}", err);

    events.delete(&fx.owner, event.id).await?;
    venues.delete(&fx.owner, venue.id).await?;
    Ok(())
}

#[tokio::test]
async fn event_status_follows_transition_table() -> Result<()> {
    let Some(pool) = common::test_pool(5).await? else {
        return Ok(());
    };
    let fx = Fixture::new(pool.clone()).await?;
    let events = EventService::new(pool);
    let id = fx.event(EventStatus::Draft).await?;

    let err = events
        .change_status(&fx.owner, id, EventStatus::Completed)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unprocessable(_)), "{:?}", err);

    let event = events.change_status(&fx.owner, id, EventStatus::Published).await?;
    assert_eq!(event.status, EventStatus::Published);
    let event = events.change_status(&fx.owner, id, EventStatus::Cancelled).await?;
    assert_eq!(event.status, EventStatus::Cancelled);

    // Cancelled is terminal
    let err = events
        .change_status(&fx.owner, id, EventStatus::Published)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unprocessable(_)), "{:?}", err);
    Ok(())
}

#[tokio::test]
async fn last_department_admin_is_kept() -> Result<()> {
    let Some(pool) = common::test_pool(5).await? else {
        return Ok(());
    };
    let fx = Fixture::new(pool.clone()).await?;
    let departments = DepartmentService::new(pool);
    let id = fx.department().await?;
    let me = fx.owner.user_id;

    let demote = UpdateDepartmentMemberRequest {
        role: DepartmentRole::Member,
    };
    let err = departments.update_member(&fx.owner, id, me, &demote).await.unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)), "{:?}", err);
    let err = departments.remove_member(&fx.owner, id, me).await.unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)), "{:?}", err);

    // With a second admin the first may step down
    let crew = fx.add_member("crew").await?;
    departments
        .add_member(
            &fx.owner,
            id,
            &AddDepartmentMemberRequest {
                user_id: crew.user_id,
                role: DepartmentRole::Admin,
            },
        )
        .await?;
    let member = departments.update_member(&fx.owner, id, me, &demote).await?;
    assert_eq!(member.role, DepartmentRole::Member);
    Ok(())
}

#[tokio::test]
async fn department_member_changes_work_on_a_single_connection() -> Result<()> {
    // Lookups inside the membership transaction must reuse its connection
    let Some(pool) = common::test_pool(1).await? else {
        return Ok(());
    };
    let fx = Fixture::new(pool.clone()).await?;
    let departments = DepartmentService::new(pool);
    let id = fx.department().await?;
    let crew = fx.add_member("crew").await?;

    departments
        .add_member(
            &fx.owner,
            id,
            &AddDepartmentMemberRequest {
                user_id: crew.user_id,
                role: DepartmentRole::Member,
            },
        )
        .await?;
    let promoted = departments
        .update_member(
            &fx.owner,
            id,
            crew.user_id,
            &UpdateDepartmentMemberRequest {
                role: DepartmentRole::Admin,
            },
        )
        .await?;
    assert_eq!(promoted.role, DepartmentRole::Admin);

    departments.remove_member(&fx.owner, id, crew.user_id).await?;
    assert_eq!(departments.list_members(&fx.owner, id).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn sole_department_admin_stays_in_tenant() -> Result<()> {
    let Some(pool) = common::test_pool(5).await? else {
        return Ok(());
    };
    let fx = Fixture::new(pool.clone()).await?;
    let departments = DepartmentService::new(pool.clone());
    let members = MemberService::new(pool);
    let id = fx.department().await?;
    let crew = fx.add_member("crew").await?;

    // Hand the department over so crew is its only admin
    departments
        .add_member(
            &fx.owner,
            id,
            &AddDepartmentMemberRequest {
                user_id: crew.user_id,
                role: DepartmentRole::Admin,
            },
        )
        .await?;
    departments.remove_member(&fx.owner, id, fx.owner.user_id).await?;

    let err = members.remove(&fx.owner, crew.user_id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)), "{:?}", err);

    let deactivate = UpdateMemberRequest {
        role_id: None,
        is_active: Some(false),
    };
    let err = members.update(&fx.owner, crew.user_id, &deactivate).await.unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)), "{:?}", err);

    // Nothing was half-applied
    let member = members.get(&fx.owner, crew.user_id).await?;
    assert!(member.is_active);
    assert_eq!(departments.list_members(&fx.owner, id).await?.len(), 1);

    // Once someone else administers the department, removal goes through
    departments
        .add_member(
            &fx.owner,
            id,
            &AddDepartmentMemberRequest {
                user_id: fx.owner.user_id,
                role: DepartmentRole::Admin,
            },
        )
        .await?;
    members.remove(&fx.owner, crew.user_id).await?;
    let remaining = departments.list_members(&fx.owner, id).await?;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].user_id, fx.owner.user_id);
    Ok(())
}

#[tokio::test]
async fn feedback_is_upserted_and_gated_on_status() -> Result<()> {
    let Some(pool) = common::test_pool(5).await? else {
        return Ok(());
    };
    let fx = Fixture::new(pool.clone()).await?;
    let feedback = FeedbackService::new(pool);

    let draft = fx.event(EventStatus::Draft).await?;
    let err = feedback
        .submit(
            &fx.owner,
            draft,
            &SubmitFeedbackRequest {
                rating: 4,
                comment: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unprocessable(_)), "{:?}", err);

    let event = fx.event(EventStatus::Completed).await?;
    feedback
        .submit(
            &fx.owner,
            event,
            &SubmitFeedbackRequest {
                rating: 2,
                comment: Some("Too loud".to_string()),
            },
        )
        .await?;
    let second = feedback
        .submit(
            &fx.owner,
            event,
            &SubmitFeedbackRequest {
                rating: 5,
                comment: Some("  Great after all ".to_string()),
            },
        )
        .await?;
    assert_eq!(second.rating, 5);
    assert_eq!(second.comment.as_deref(), Some("Great after all"));

    let listing = feedback.list(&fx.owner, event).await?;
    assert_eq!(listing.items.len(), 1);
    assert_eq!(listing.summary.count, 1);
    assert_eq!(listing.summary.average_rating, Some(5.0));

    feedback.delete_own(&fx.owner, event).await?;
    let err = feedback.delete_own(&fx.owner, event).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)), "{:?}", err);
    Ok(())
}

#[tokio::test]
async fn identical_uploads_share_a_blob_and_delete_softly() -> Result<()> {
    let Some(pool) = common::test_pool(5).await? else {
        return Ok(());
    };
    let fx = Fixture::new(pool.clone()).await?;
    let dir = tempfile::tempdir()?;
    let storage: Arc<dyn StorageBackend> = Arc::new(FilesystemBackend::new(dir.path()));
    let attachments = AttachmentService::new(pool, storage.clone(), 1024 * 1024);
    let event = fx.event(EventStatus::Draft).await?;

    let upload = |name: &str| NewUpload {
        owner_type: OwnerType::Event,
        owner_id: event,
        file_name: name.to_string(),
        content_type: Some("text/plain".to_string()),
        data: b"seating plan v1".to_vec(),
    };
    let first = attachments.upload(&fx.owner, upload("plan.txt")).await?;
    let second = attachments.upload(&fx.owner, upload("plan-copy.txt")).await?;

    assert_ne!(first.id, second.id);
    assert_eq!(first.checksum, second.checksum);
    assert_eq!(first.storage_path, second.storage_path);
    assert!(storage.exists(&first.storage_path).await?);

    attachments.delete(&fx.owner, first.id).await?;
    let err = attachments.get(&fx.owner, first.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)), "{:?}", err);

    // The surviving row still downloads from the shared blob
    let (kept, data) = attachments.download(&fx.owner, second.id).await?;
    assert_eq!(kept.file_name, "plan-copy.txt");
    assert_eq!(data, b"seating plan v1");
    Ok(())
}

#[tokio::test]
async fn chat_paging_keeps_messages_with_equal_timestamps() -> Result<()> {
    let Some(pool) = common::test_pool(5).await? else {
        return Ok(());
    };
    let fx = Fixture::new(pool.clone()).await?;
    let chat = ChatService::new(pool.clone());
    let department = fx.department().await?;

    for body in ["doors at six", "bring badges", "coffee is in hall B"] {
        chat.post(
            &fx.owner,
            department,
            &PostMessageRequest {
                body: body.to_string(),
            },
        )
        .await?;
    }
    sqlx::query("UPDATE chat_messages SET created_at = $2 WHERE department_id = $1")
        .bind(department)
        .bind(Utc::now())
        .execute(&pool)
        .await?;

    let api = &config::config().api;
    let mut seen = Vec::new();
    let mut before = None;
    loop {
        let page = chat
            .list(
                &fx.owner,
                api,
                department,
                &MessageQuery {
                    before,
                    limit: Some(1),
                },
            )
            .await?;
        let Some(message) = page.first() else {
            break;
        };
        seen.push(message.id);
        before = Some(message.id);
    }

    assert_eq!(seen.len(), 3);
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 3);

    let err = chat
        .list(
            &fx.owner,
            api,
            department,
            &MessageQuery {
                before: Some(Uuid::new_v4()),
                limit: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::BadRequest(_)), "{:?}", err);
    Ok(())
}
