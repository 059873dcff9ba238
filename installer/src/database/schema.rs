// Application schema created by the installer
//
// Tables are listed in creation order; foreign keys only point backwards, so dropping
// in reverse order always succeeds.

/// Schema version written to the `Config` table and to ConfigData.
pub const DATABASE_VERSION: &str = "300.18072501";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDef {
    pub name: &'static str,
    pub body: &'static str,
}

pub const TABLES: &[TableDef] = &[
    TableDef {
        name: "Config",
        body: "`parameter` varchar(50) NOT NULL,
  `value` varchar(4000) DEFAULT NULL,
  PRIMARY KEY (`parameter`)",
    },
    TableDef {
        name: "UserGroup",
        body: "`id` smallint(5) unsigned NOT NULL AUTO_INCREMENT,
  `name` varchar(50) NOT NULL,
  `description` varchar(255) DEFAULT NULL,
  PRIMARY KEY (`id`),
  UNIQUE KEY `uk_UserGroup_name` (`name`)",
    },
    TableDef {
        name: "UserProfile",
        body: "`id` smallint(5) unsigned NOT NULL AUTO_INCREMENT,
  `name` varchar(45) NOT NULL,
  `profile` blob NOT NULL,
  PRIMARY KEY (`id`),
  UNIQUE KEY `uk_UserProfile_name` (`name`)",
    },
    TableDef {
        name: "User",
        body: "`id` smallint(5) unsigned NOT NULL AUTO_INCREMENT,
  `name` varchar(80) NOT NULL,
  `userGroupId` smallint(5) unsigned NOT NULL,
  `login` varchar(50) NOT NULL,
  `email` varchar(80) DEFAULT NULL,
  `notes` text DEFAULT NULL,
  `loginCount` int(10) unsigned NOT NULL DEFAULT 0,
  `userProfileId` smallint(5) unsigned NOT NULL,
  `lastLogin` datetime DEFAULT NULL,
  `lastUpdate` timestamp NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
  `lastUpdateMPass` int(11) unsigned NOT NULL DEFAULT 0,
  `isAdminApp` tinyint(1) NOT NULL DEFAULT 0,
  `isAdminAcc` tinyint(1) NOT NULL DEFAULT 0,
  `isDisabled` tinyint(1) NOT NULL DEFAULT 0,
  `isChangePass` tinyint(1) NOT NULL DEFAULT 0,
  `isChangedPass` tinyint(1) NOT NULL DEFAULT 0,
  `pass` varbinary(500) NOT NULL,
  `mPass` varbinary(2000) DEFAULT NULL,
  `mKey` varbinary(2000) DEFAULT NULL,
  `preferences` blob DEFAULT NULL,
  PRIMARY KEY (`id`),
  UNIQUE KEY `uk_User_login` (`login`),
  KEY `idx_User_userGroupId` (`userGroupId`),
  CONSTRAINT `fk_User_userGroupId` FOREIGN KEY (`userGroupId`) REFERENCES `UserGroup` (`id`),
  CONSTRAINT `fk_User_userProfileId` FOREIGN KEY (`userProfileId`) REFERENCES `UserProfile` (`id`)",
    },
    TableDef {
        name: "Category",
        body: "`id` mediumint(8) unsigned NOT NULL AUTO_INCREMENT,
  `name` varchar(50) NOT NULL,
  `hash` varbinary(40) NOT NULL,
  `description` varchar(255) DEFAULT NULL,
  PRIMARY KEY (`id`),
  UNIQUE KEY `uk_Category_hash` (`hash`)",
    },
    TableDef {
        name: "Client",
        body: "`id` mediumint(8) unsigned NOT NULL AUTO_INCREMENT,
  `name` varchar(100) NOT NULL,
  `hash` varbinary(40) NOT NULL,
  `description` varchar(255) DEFAULT NULL,
  `isGlobal` tinyint(1) NOT NULL DEFAULT 0,
  PRIMARY KEY (`id`),
  UNIQUE KEY `uk_Client_hash` (`hash`)",
    },
    TableDef {
        name: "Account",
        body: "`id` mediumint(8) unsigned NOT NULL AUTO_INCREMENT,
  `userGroupId` smallint(5) unsigned NOT NULL,
  `userId` smallint(5) unsigned NOT NULL,
  `userEditId` smallint(5) unsigned NOT NULL,
  `clientId` mediumint(8) unsigned NOT NULL,
  `categoryId` mediumint(8) unsigned NOT NULL,
  `name` varchar(100) NOT NULL,
  `login` varchar(50) DEFAULT NULL,
  `url` varchar(255) DEFAULT NULL,
  `pass` varbinary(2000) NOT NULL,
  `key` varbinary(2000) NOT NULL,
  `notes` text DEFAULT NULL,
  `dateAdd` datetime NOT NULL,
  `dateEdit` datetime DEFAULT NULL,
  `passDate` int(11) unsigned DEFAULT NULL,
  PRIMARY KEY (`id`),
  KEY `idx_Account_categoryId` (`categoryId`),
  CONSTRAINT `fk_Account_userGroupId` FOREIGN KEY (`userGroupId`) REFERENCES `UserGroup` (`id`),
  CONSTRAINT `fk_Account_userId` FOREIGN KEY (`userId`) REFERENCES `User` (`id`),
  CONSTRAINT `fk_Account_clientId` FOREIGN KEY (`clientId`) REFERENCES `Client` (`id`),
  CONSTRAINT `fk_Account_categoryId` FOREIGN KEY (`categoryId`) REFERENCES `Category` (`id`)",
    },
];

pub fn table_names() -> impl Iterator<Item = &'static str> {
    TABLES.iter().map(|t| t.name)
}

/// A bound column value for seed inserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Text(String),
    Int(i64),
    Bool(bool),
    Bytes(Vec<u8>),
    /// Value of an AUTO_INCREMENT id returned by an earlier insert.
    Ref(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedRow {
    pub table: &'static str,
    pub columns: Vec<(&'static str, SqlValue)>,
    /// Key under which the inserted row id is remembered for later `SqlValue::Ref`s.
    pub id_key: Option<&'static str>,
}

impl SeedRow {
    pub fn new(table: &'static str) -> Self {
        Self {
            table,
            columns: Vec::new(),
            id_key: None,
        }
    }

    pub fn col(mut self, name: &'static str, value: SqlValue) -> Self {
        self.columns.push((name, value));
        self
    }

    pub fn text(self, name: &'static str, value: impl Into<String>) -> Self {
        self.col(name, SqlValue::Text(value.into()))
    }

    pub fn remember_id(mut self, key: &'static str) -> Self {
        self.id_key = Some(key);
        self
    }
}

/// Admin account material computed by the installer.
#[derive(Clone)]
pub struct AdminSeed {
    pub login: String,
    pub pass_hash: String,
    pub sealed_master_pass: Vec<u8>,
    pub master_key_salt: Vec<u8>,
    pub master_pwd_hash: String,
    pub updated_at: i64,
}

/// Rows seeded after the schema is created, in insert order.
pub fn admin_seed_rows(seed: &AdminSeed) -> Vec<SeedRow> {
    vec![
        SeedRow::new("UserGroup")
            .text("name", "Admins")
            .text("description", "sysPass Admins")
            .remember_id("group"),
        SeedRow::new("UserProfile")
            .text("name", "Admin")
            .col("profile", SqlValue::Bytes(b"{}".to_vec()))
            .remember_id("profile"),
        SeedRow::new("User")
            .text("name", "sysPass Admin")
            .text("login", seed.login.clone())
            .col("userGroupId", SqlValue::Ref("group"))
            .col("userProfileId", SqlValue::Ref("profile"))
            .col("pass", SqlValue::Bytes(seed.pass_hash.clone().into_bytes()))
            .col("mPass", SqlValue::Bytes(seed.sealed_master_pass.clone()))
            .col("mKey", SqlValue::Bytes(seed.master_key_salt.clone()))
            .col("lastUpdateMPass", SqlValue::Int(seed.updated_at))
            .col("isAdminApp", SqlValue::Bool(true))
            .col("isAdminAcc", SqlValue::Bool(false))
            .col("isChangePass", SqlValue::Bool(false))
            .remember_id("admin"),
        SeedRow::new("Config")
            .text("parameter", "masterPwd")
            .text("value", seed.master_pwd_hash.clone()),
        SeedRow::new("Config")
            .text("parameter", "lastupdatempass")
            .text("value", seed.updated_at.to_string()),
        SeedRow::new("Config")
            .text("parameter", "version")
            .text("value", DATABASE_VERSION),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn seed() -> AdminSeed {
        AdminSeed {
            login: "admin".to_string(),
            pass_hash: "pbkdf2-sha256$1000$c2FsdA==$aGFzaA==".to_string(),
            sealed_master_pass: vec![1, 2, 3],
            master_key_salt: vec![4, 5, 6],
            master_pwd_hash: "pbkdf2-sha256$1000$x$y".to_string(),
            updated_at: 1_700_000_000,
        }
    }

    #[test]
    fn table_names_are_unique() {
        let names: HashSet<_> = table_names().collect();
        assert_eq!(names.len(), TABLES.len());
    }

    #[test]
    fn foreign_keys_only_reference_earlier_tables() {
        for (i, table) in TABLES.iter().enumerate() {
            for later in TABLES.iter().skip(i + 1) {
                let reference = format!("REFERENCES `{}`", later.name);
                assert!(
                    !table.body.contains(&reference),
                    "{} references later table {}",
                    table.name,
                    later.name
                );
            }
        }
    }

    #[test]
    fn seed_refs_point_at_remembered_ids() {
        let rows = admin_seed_rows(&seed());
        let mut remembered = HashSet::new();
        for row in &rows {
            assert!(TABLES.iter().any(|t| t.name == row.table));
            for (_, value) in &row.columns {
                if let SqlValue::Ref(key) = value {
                    assert!(remembered.contains(key), "{} used before insert", key);
                }
            }
            if let Some(key) = row.id_key {
                remembered.insert(key);
            }
        }
    }

    #[test]
    fn config_rows_carry_master_hash_and_version() {
        let rows = admin_seed_rows(&seed());
        let config: Vec<_> = rows.iter().filter(|r| r.table == "Config").collect();
        assert_eq!(config.len(), 3);
        assert!(config.iter().any(|r| r.columns.contains(&(
            "value",
            SqlValue::Text("pbkdf2-sha256$1000$x$y".to_string())
        ))));
        assert!(config
            .iter()
            .any(|r| r.columns.contains(&("value", SqlValue::Text(DATABASE_VERSION.to_string())))));
    }
}
