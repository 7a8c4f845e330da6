use rand::distr::Alphanumeric;
use rand::Rng;

pub fn generate_flag(challenge_id: &str) -> String {
    let token: String = rand::rng().sample_iter(&Alphanumeric).take(32).map(char::from).collect();
    format!("flag{{{challenge_id}_{token}}}")
}

pub fn flag_secret_name(instance_name: &str) -> String {
    format!("flag-secret-{instance_name}")
}

pub struct DbCredentials {
    pub password: String,
    pub root_password: String,
    pub secret_name: String,
}

/// Generated for the SQL-injection challenge type only: a random
/// password and root password pair plus the name of the Kubernetes
/// Secret that will hold them.
pub fn generate_db_credentials(instance_name: &str) -> DbCredentials {
    let password: String = rand::rng().sample_iter(&Alphanumeric).take(12).map(char::from).collect();
    let root_password: String = rand::rng().sample_iter(&Alphanumeric).take(16).map(char::from).collect();
    DbCredentials {
        password,
        root_password,
        secret_name: format!("db-secret-{instance_name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_embeds_challenge_id() {
        let flag = generate_flag("sql-injection-1");
        assert!(flag.starts_with("flag{sql-injection-1_"));
        assert!(flag.ends_with('}'));
    }

    #[test]
    fn db_credentials_are_unique_per_call() {
        let a = generate_db_credentials("chal-1");
        let b = generate_db_credentials("chal-1");
        assert_ne!(a.password, b.password);
    }
}
