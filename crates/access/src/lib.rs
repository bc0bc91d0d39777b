use chrono::{DateTime, Utc};
use core_model::{Principal, Role, UserDirectory, UserRecord, iso_timestamp};
use tracing::{info, warn};

mod cooldown;

pub use cooldown::{PublicCooldown, remaining_minutes};

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("this action requires an admin account")]
    AdminRequired,
    #[error("account {id} is protected")]
    ProtectedAccount { id: String },
    #[error("cannot change or delete your own account")]
    SelfTarget,
    #[error("the superadmin role cannot be granted")]
    SuperAdminGrant,
    #[error("no user with id {id}")]
    UnknownUser { id: String },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Case-insensitive match against the configured superadmin address. An
/// unset or blank address matches nobody.
pub fn is_superadmin_email(email: Option<&str>, superadmin_email: Option<&str>) -> bool {
    match (email.map(str::trim), superadmin_email.map(str::trim)) {
        (Some(e), Some(s)) if !s.is_empty() => e.eq_ignore_ascii_case(s),
        _ => false,
    }
}

/// The signed-in principal and the role it resolved to.
#[derive(Debug, Clone)]
pub struct SessionContext {
    principal: Principal,
    role: Role,
    superadmin_email: Option<String>,
}

impl SessionContext {
    /// Resolves the principal's role. The superadmin address always wins;
    /// otherwise the stored role applies, and a directory failure degrades
    /// to the address check alone.
    pub fn sign_in<D>(directory: &D, principal: Principal, superadmin_email: Option<&str>) -> Self
    where
        D: UserDirectory + ?Sized,
    {
        let role = if is_superadmin_email(principal.email.as_deref(), superadmin_email) {
            Role::SuperAdmin
        } else {
            match directory.get_user(&principal.uid) {
                Ok(Some(user)) => user.role,
                Ok(None) => Role::User,
                Err(err) => {
                    warn!(uid = %principal.uid, error = %format!("{err:#}"), "role lookup failed; treating as user");
                    Role::User
                }
            }
        };
        info!(uid = %principal.uid, role = %role, "signed in");
        Self {
            principal,
            role,
            superadmin_email: superadmin_email
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned),
        }
    }

    pub fn sign_out(self) -> Principal {
        info!(uid = %self.principal.uid, "signed out");
        self.principal
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn uid(&self) -> &str {
        &self.principal.uid
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }

    fn require_admin(&self) -> Result<(), AccessError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AccessError::AdminRequired)
        }
    }

    fn is_protected(&self, user: &UserRecord) -> bool {
        user.role == Role::SuperAdmin
            || is_superadmin_email(user.email.as_deref(), self.superadmin_email.as_deref())
    }

    /// Looks up a user another admin may act on.
    fn actionable_target<D>(&self, directory: &D, target_id: &str) -> Result<UserRecord, AccessError>
    where
        D: UserDirectory + ?Sized,
    {
        self.require_admin()?;
        if target_id == self.uid() {
            return Err(AccessError::SelfTarget);
        }
        let target = directory
            .get_user(target_id)?
            .ok_or_else(|| AccessError::UnknownUser {
                id: target_id.to_string(),
            })?;
        if self.is_protected(&target) {
            return Err(AccessError::ProtectedAccount {
                id: target_id.to_string(),
            });
        }
        Ok(target)
    }
}

/// Creates the principal's user document.
pub fn register_user<D>(
    directory: &D,
    principal: &Principal,
    display_name: &str,
    superadmin_email: Option<&str>,
    now: DateTime<Utc>,
) -> anyhow::Result<UserRecord>
where
    D: UserDirectory + ?Sized,
{
    let role = if is_superadmin_email(principal.email.as_deref(), superadmin_email) {
        Role::SuperAdmin
    } else {
        Role::User
    };
    let display_name = display_name.trim();
    let user = UserRecord {
        id: principal.uid.clone(),
        email: principal.email.clone(),
        display_name: (!display_name.is_empty()).then(|| display_name.to_string()),
        role,
        created_at: Some(iso_timestamp(now)),
    };
    directory.upsert_user(&user)?;
    info!(uid = %user.id, role = %user.role, "registered user");
    Ok(user)
}

/// Users newest first by `createdAt`; users without one sort last.
pub fn list_users<D>(ctx: &SessionContext, directory: &D) -> Result<Vec<UserRecord>, AccessError>
where
    D: UserDirectory + ?Sized,
{
    ctx.require_admin()?;
    let mut users = directory.list_users()?;
    users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(users)
}

pub fn change_role<D>(
    ctx: &SessionContext,
    directory: &D,
    target_id: &str,
    new_role: Role,
) -> Result<(), AccessError>
where
    D: UserDirectory + ?Sized,
{
    if new_role == Role::SuperAdmin {
        ctx.require_admin()?;
        return Err(AccessError::SuperAdminGrant);
    }
    let target = ctx.actionable_target(directory, target_id)?;
    if !directory.set_user_role(target_id, new_role)? {
        return Err(AccessError::UnknownUser {
            id: target_id.to_string(),
        });
    }
    info!(by = %ctx.uid(), target = %target_id, from = %target.role, to = %new_role, "role changed");
    Ok(())
}

/// Removes the user document only; the identity account is untouched.
pub fn delete_user<D>(ctx: &SessionContext, directory: &D, target_id: &str) -> Result<(), AccessError>
where
    D: UserDirectory + ?Sized,
{
    ctx.actionable_target(directory, target_id)?;
    if !directory.delete_user(target_id)? {
        return Err(AccessError::UnknownUser {
            id: target_id.to_string(),
        });
    }
    info!(by = %ctx.uid(), target = %target_id, "user deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use store_sqlite::SqliteStore;

    const BOSS: &str = "boss@example.test";

    struct BrokenDirectory;

    impl UserDirectory for BrokenDirectory {
        fn get_user(&self, _: &str) -> anyhow::Result<Option<UserRecord>> {
            anyhow::bail!("directory offline")
        }
        fn list_users(&self) -> anyhow::Result<Vec<UserRecord>> {
            anyhow::bail!("directory offline")
        }
        fn upsert_user(&self, _: &UserRecord) -> anyhow::Result<()> {
            anyhow::bail!("directory offline")
        }
        fn set_user_role(&self, _: &str, _: Role) -> anyhow::Result<bool> {
            anyhow::bail!("directory offline")
        }
        fn delete_user(&self, _: &str) -> anyhow::Result<bool> {
            anyhow::bail!("directory offline")
        }
    }

    fn principal(uid: &str, email: &str) -> Principal {
        Principal {
            uid: uid.to_string(),
            email: Some(email.to_string()),
        }
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 9, 0, 0).unwrap()
    }

    /// boss (superadmin by email), admin, two users.
    fn directory() -> SqliteStore {
        let store = SqliteStore::open(":memory:").unwrap();
        store.init_schema().unwrap();
        register_user(&store, &principal("boss", "Boss@Example.test"), "Boss", Some(BOSS), at(1))
            .unwrap();
        register_user(&store, &principal("adm", "adm@example.test"), "Adm", Some(BOSS), at(2))
            .unwrap();
        store.set_user_role("adm", Role::Admin).unwrap();
        register_user(&store, &principal("u1", "u1@example.test"), "U1", Some(BOSS), at(3))
            .unwrap();
        register_user(&store, &principal("u2", "u2@example.test"), " ", Some(BOSS), at(4))
            .unwrap();
        store
    }

    fn sign_in(store: &SqliteStore, uid: &str) -> SessionContext {
        let email = format!("{uid}@example.test");
        SessionContext::sign_in(store, principal(uid, &email), Some(BOSS))
    }

    #[test]
    fn superadmin_email_matches_case_insensitively() {
        assert!(is_superadmin_email(Some(" BOSS@example.test"), Some(BOSS)));
        assert!(!is_superadmin_email(Some("other@example.test"), Some(BOSS)));
        assert!(!is_superadmin_email(None, Some(BOSS)));
        assert!(!is_superadmin_email(Some(""), Some("  ")));
    }

    #[test]
    fn register_assigns_roles() {
        let store = directory();
        let boss = store.get_user("boss").unwrap().unwrap();
        assert_eq!(boss.role, Role::SuperAdmin);
        let u2 = store.get_user("u2").unwrap().unwrap();
        assert_eq!(u2.role, Role::User);
        assert_eq!(u2.display_name, None);
        assert_eq!(u2.created_at.as_deref(), Some("2024-05-04T09:00:00.000Z"));
    }

    #[test]
    fn sign_in_resolves_roles() {
        let store = directory();
        assert_eq!(sign_in(&store, "adm").role(), Role::Admin);
        assert_eq!(sign_in(&store, "u1").role(), Role::User);
        assert_eq!(sign_in(&store, "stranger").role(), Role::User);

        let boss = SessionContext::sign_in(&store, principal("boss", BOSS), Some(BOSS));
        assert_eq!(boss.role(), Role::SuperAdmin);
        assert!(boss.is_admin());
        assert_eq!(boss.sign_out().uid, "boss");
    }

    #[test]
    fn superadmin_email_overrides_stored_role() {
        let store = directory();
        store.set_user_role("boss", Role::User).unwrap();
        let ctx = SessionContext::sign_in(&store, principal("boss", BOSS), Some(BOSS));
        assert_eq!(ctx.role(), Role::SuperAdmin);
    }

    #[test]
    fn directory_failure_falls_back_to_email() {
        let ctx = SessionContext::sign_in(&BrokenDirectory, principal("x", "x@example.test"), Some(BOSS));
        assert_eq!(ctx.role(), Role::User);
        let ctx = SessionContext::sign_in(&BrokenDirectory, principal("b", BOSS), Some(BOSS));
        assert_eq!(ctx.role(), Role::SuperAdmin);
    }

    #[test]
    fn admin_changes_roles() {
        let store = directory();
        let ctx = sign_in(&store, "adm");
        change_role(&ctx, &store, "u1", Role::Admin).unwrap();
        assert_eq!(store.get_user("u1").unwrap().unwrap().role, Role::Admin);
    }

    #[test]
    fn role_change_refusals() {
        let store = directory();
        let admin = sign_in(&store, "adm");
        let user = sign_in(&store, "u1");

        assert!(matches!(
            change_role(&user, &store, "u2", Role::Admin),
            Err(AccessError::AdminRequired)
        ));
        assert!(matches!(
            change_role(&admin, &store, "adm", Role::User),
            Err(AccessError::SelfTarget)
        ));
        assert!(matches!(
            change_role(&admin, &store, "boss", Role::User),
            Err(AccessError::ProtectedAccount { .. })
        ));
        assert!(matches!(
            change_role(&admin, &store, "u1", Role::SuperAdmin),
            Err(AccessError::SuperAdminGrant)
        ));
        assert!(matches!(
            change_role(&admin, &store, "ghost", Role::Admin),
            Err(AccessError::UnknownUser { .. })
        ));
        assert_eq!(store.get_user("u1").unwrap().unwrap().role, Role::User);
    }

    #[test]
    fn protected_by_email_even_with_demoted_role() {
        let store = directory();
        store.set_user_role("boss", Role::User).unwrap();
        let admin = sign_in(&store, "adm");
        assert!(matches!(
            delete_user(&admin, &store, "boss"),
            Err(AccessError::ProtectedAccount { .. })
        ));
    }

    #[test]
    fn delete_user_rules() {
        let store = directory();
        let admin = sign_in(&store, "adm");
        let user = sign_in(&store, "u1");

        assert!(matches!(
            delete_user(&user, &store, "u2"),
            Err(AccessError::AdminRequired)
        ));
        assert!(matches!(
            delete_user(&admin, &store, "adm"),
            Err(AccessError::SelfTarget)
        ));
        delete_user(&admin, &store, "u2").unwrap();
        assert!(store.get_user("u2").unwrap().is_none());
    }

    #[test]
    fn list_users_newest_first_for_admins_only() {
        let store = directory();
        let admin = sign_in(&store, "adm");
        let ids: Vec<_> = list_users(&admin, &store)
            .unwrap()
            .into_iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(ids, vec!["u2", "u1", "adm", "boss"]);

        let user = sign_in(&store, "u1");
        assert!(matches!(
            list_users(&user, &store),
            Err(AccessError::AdminRequired)
        ));
    }

    #[test]
    fn store_errors_surface_as_store_variant() {
        let admin = SessionContext::sign_in(&BrokenDirectory, principal("b", BOSS), Some(BOSS));
        assert!(matches!(
            delete_user(&admin, &BrokenDirectory, "u1"),
            Err(AccessError::Store(_))
        ));
    }
}
