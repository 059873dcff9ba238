// Installation request model

use serde::{Deserialize, Serialize};

use crate::database::provisioning::validate_db_name;
use crate::error::InstallError;

fn default_site_lang() -> String {
    "en_US".to_string()
}

/// Everything the caller supplies for one installation run.
///
/// In hosting mode `db_admin_user`/`db_admin_pass` are the pre-provisioned application
/// account, not a superuser.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct InstallParameters {
    pub db_admin_user: String,
    pub db_admin_pass: String,
    pub db_name: String,
    pub db_host: String,
    pub admin_login: String,
    pub admin_pass: String,
    pub master_password: String,
    #[serde(default = "default_site_lang")]
    pub site_lang: String,
    #[serde(default)]
    pub hosting_mode: bool,
}

impl std::fmt::Debug for InstallParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallParameters")
            .field("db_admin_user", &self.db_admin_user)
            .field("db_admin_pass", &"***")
            .field("db_name", &self.db_name)
            .field("db_host", &self.db_host)
            .field("admin_login", &self.admin_login)
            .field("admin_pass", &"***")
            .field("master_password", &"***")
            .field("site_lang", &self.site_lang)
            .field("hosting_mode", &self.hosting_mode)
            .finish()
    }
}

impl InstallParameters {
    /// Structural checks only; host policy is applied by `installation::host`.
    pub fn validate(&self) -> Result<(), InstallError> {
        let required: [(&'static str, &str); 7] = [
            ("adminLogin", &self.admin_login),
            ("adminPass", &self.admin_pass),
            ("masterPassword", &self.master_password),
            ("dbAdminUser", &self.db_admin_user),
            ("dbName", &self.db_name),
            ("dbHost", &self.db_host),
            ("siteLang", &self.site_lang),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(InstallError::MissingParameter { field });
            }
        }

        // The hosting account's password becomes the persisted db_pass.
        if self.hosting_mode && self.db_admin_pass.is_empty() {
            return Err(InstallError::MissingParameter {
                field: "dbAdminPass",
            });
        }

        validate_db_name(&self.db_name).map_err(|reason| InstallError::InvalidParameter {
            field: "dbName",
            reason,
        })?;

        if self.admin_login.chars().any(char::is_whitespace) {
            return Err(InstallError::InvalidParameter {
                field: "adminLogin",
                reason: "login cannot contain whitespace".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn params() -> InstallParameters {
        InstallParameters {
            db_admin_user: "root".to_string(),
            db_admin_pass: "syspass".to_string(),
            db_name: "syspass_test".to_string(),
            db_host: "syspass-db".to_string(),
            admin_login: "admin".to_string(),
            admin_pass: "syspass_admin".to_string(),
            master_password: "00123456789".to_string(),
            site_lang: "en_US".to_string(),
            hosting_mode: false,
        }
    }

    #[test]
    fn complete_parameters_validate() {
        assert!(params().validate().is_ok());
    }

    #[test]
    fn each_required_field_is_enforced() {
        let cases: Vec<(&str, fn(&mut InstallParameters))> = vec![
            ("adminLogin", |p| p.admin_login.clear()),
            ("adminPass", |p| p.admin_pass.clear()),
            ("masterPassword", |p| p.master_password = "  ".to_string()),
            ("dbAdminUser", |p| p.db_admin_user.clear()),
            ("dbName", |p| p.db_name.clear()),
            ("dbHost", |p| p.db_host.clear()),
        ];
        for (field, mutate) in cases {
            let mut p = params();
            mutate(&mut p);
            let err = p.validate().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "field {}", field);
            assert!(err.to_string().contains(field), "{} not named in: {}", field, err);
        }
    }

    #[test]
    fn db_admin_pass_may_be_empty() {
        let mut p = params();
        p.db_admin_pass.clear();
        assert!(p.validate().is_ok());
    }

    #[test]
    fn hosting_mode_requires_db_password() {
        let mut p = params();
        p.hosting_mode = true;
        p.db_admin_pass.clear();
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("dbAdminPass"));
    }

    #[test]
    fn bad_db_name_is_invalid_argument() {
        let mut p = params();
        p.db_name = "syspass-test".to_string();
        let err = p.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.code(), 0);
    }

    #[test]
    fn debug_never_prints_secrets() {
        let rendered = format!("{:?}", params());
        assert!(!rendered.contains("syspass_admin"));
        assert!(!rendered.contains("00123456789"));
        assert!(!rendered.contains("\"syspass\""));
        assert!(rendered.contains("syspass-db"));
    }

    #[test]
    fn toml_defaults_site_lang_and_mode() {
        let p: InstallParameters = toml::from_str(
            r#"
            db_admin_user = "root"
            db_admin_pass = "syspass"
            db_name = "syspass_test"
            db_host = "syspass-db"
            admin_login = "admin"
            admin_pass = "syspass_admin"
            master_password = "00123456789"
            "#,
        )
        .unwrap();
        assert_eq!(p.site_lang, "en_US");
        assert!(!p.hosting_mode);
    }
}
