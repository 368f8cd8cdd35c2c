//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use kc_harness::{
    AdminConnector, AdminCredentials, ClientSecret, HarnessError, RealmAdmin, RemoteNode, Result,
    RoleRef,
};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use wiremock::{Mock, MockServer};

pub const FAKE_PID: u32 = 4242;
pub const READY_LINE: &str = "INFO  [io.quarkus] Running the server in development mode.\n";

/// Scripted behaviour and recorded effects of a [`FakeNode`].
#[derive(Debug, Default)]
pub struct NodeSim {
    pub commands: Vec<String>,
    pub files: HashMap<String, String>,
    pub dirs: Vec<String>,
    pub pids: Vec<u32>,
    /// Write the readiness line when the launch command runs
    pub ready_on_start: bool,
    /// Processes survive every signal
    pub ignore_signals: bool,
    /// `kill` exits non-zero even when it delivers the signal
    pub kill_reports_failure: bool,
    pub fail_data_dir_cleanup: bool,
    pub fail_mkdirs: bool,
    pub fail_copy_to: bool,
    /// The launch command spawns the process but exits non-zero
    pub fail_launch: bool,
}

/// In-memory node that interprets the handful of commands the service issues.
pub struct FakeNode {
    hostname: String,
    log_file: String,
    sim: RefCell<NodeSim>,
}

impl FakeNode {
    pub fn new(hostname: &str, log_file: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            log_file: log_file.to_string(),
            sim: RefCell::new(NodeSim {
                ready_on_start: true,
                ..NodeSim::default()
            }),
        }
    }

    pub fn configure(&self, f: impl FnOnce(&mut NodeSim)) {
        f(&mut self.sim.borrow_mut());
    }

    pub fn commands(&self) -> Vec<String> {
        self.sim.borrow().commands.clone()
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.sim.borrow().files.get(path).cloned()
    }

    pub fn pids_now(&self) -> Vec<u32> {
        self.sim.borrow().pids.clone()
    }

    fn failure(cmd: &str, stderr: &str) -> HarnessError {
        HarnessError::Remote {
            command: cmd.to_string(),
            status: Some(1),
            stderr: stderr.to_string(),
        }
    }
}

impl RemoteNode for FakeNode {
    fn name(&self) -> &str {
        "fake-node"
    }

    fn hostname(&self) -> &str {
        &self.hostname
    }

    fn ssh(&self, cmd: &str) -> Result<()> {
        let mut sim = self.sim.borrow_mut();
        sim.commands.push(cmd.to_string());

        if let Some(path) = cmd.strip_prefix("touch ") {
            sim.files.entry(path.to_string()).or_default();
        } else if cmd.contains(" start-dev ") {
            sim.pids = vec![FAKE_PID];
            if sim.fail_launch {
                return Err(Self::failure(cmd, "kc.sh: launch failed"));
            }
            if sim.ready_on_start {
                sim.files
                    .entry(self.log_file.clone())
                    .or_default()
                    .push_str(READY_LINE);
            }
        } else if let Some(rest) = cmd.strip_prefix("kill -s ") {
            let pid: u32 = rest
                .split_whitespace()
                .nth(1)
                .and_then(|p| p.parse().ok())
                .ok_or_else(|| Self::failure(cmd, "bad pid"))?;
            if !sim.ignore_signals {
                sim.pids.retain(|p| *p != pid);
            }
            if sim.kill_reports_failure {
                return Err(Self::failure(cmd, "No such process"));
            }
        } else if let Some(path) = cmd.strip_prefix("rm -rf ") {
            if path.ends_with("/data/*") {
                if sim.fail_data_dir_cleanup {
                    return Err(Self::failure(cmd, "Permission denied"));
                }
            } else {
                sim.files.remove(path);
            }
        } else if let Some(path) = cmd.strip_prefix("rm ") {
            if sim.files.remove(path).is_none() {
                return Err(Self::failure(cmd, "No such file or directory"));
            }
        }
        Ok(())
    }

    fn ssh_output(&self, cmd: &str) -> Result<String> {
        self.sim.borrow_mut().commands.push(cmd.to_string());
        Ok(String::new())
    }

    fn copy_to(&self, local: &Path, remote: &str) -> Result<()> {
        if self.sim.borrow().fail_copy_to {
            return Err(Self::failure(remote, "scp: Permission denied"));
        }
        let contents = std::fs::read_to_string(local)?;
        self.sim
            .borrow_mut()
            .files
            .insert(remote.to_string(), contents);
        Ok(())
    }

    fn copy_from(&self, remote: &str, local: &Path) -> Result<()> {
        let contents = self
            .file(remote)
            .ok_or_else(|| Self::failure(remote, "No such file or directory"))?;
        std::fs::write(local, contents)?;
        Ok(())
    }

    fn mkdirs(&self, path: &str) -> Result<()> {
        let mut sim = self.sim.borrow_mut();
        if sim.fail_mkdirs {
            return Err(Self::failure(path, "File exists"));
        }
        sim.dirs.push(path.to_string());
        Ok(())
    }

    fn file_size(&self, path: &str) -> Result<u64> {
        self.file(path)
            .map(|contents| contents.len() as u64)
            .ok_or_else(|| Self::failure(path, "No such file or directory"))
    }

    fn read_from(&self, path: &str, offset: u64) -> Result<String> {
        let contents = self
            .file(path)
            .ok_or_else(|| Self::failure(path, "No such file or directory"))?;
        Ok(contents.get(offset as usize..).unwrap_or_default().to_string())
    }

    fn java_pids(&self, _marker: &str) -> Result<Vec<u32>> {
        Ok(self.pids_now())
    }
}

#[derive(Debug, Clone)]
pub struct FakeClient {
    pub id: String,
    pub payload: Value,
    pub secret: Option<String>,
    pub roles: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct FakeUser {
    pub id: String,
    pub payload: Value,
    pub updates: Vec<Value>,
    pub client_roles: Vec<(String, RoleRef)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    pub server_url: String,
    pub username: String,
    pub realm: String,
}

/// Server-side state shared by every admin a [`FakeConnector`] hands out.
#[derive(Debug, Default)]
pub struct RealmStore {
    pub realms: Vec<Value>,
    pub clients: HashMap<(String, String), FakeClient>,
    pub users: HashMap<(String, String), FakeUser>,
    pub logins: Vec<Login>,
    pub calls: Vec<String>,
    pub rejected_users: Vec<String>,
    next_id: u32,
}

impl RealmStore {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn realm_exists(&self, realm: &str) -> bool {
        realm == "master" || self.realms.iter().any(|r| r["realm"] == realm)
    }

    pub fn client(&self, realm: &str, client_id: &str) -> Option<&FakeClient> {
        self.clients.get(&(realm.to_string(), client_id.to_string()))
    }

    pub fn user(&self, realm: &str, username: &str) -> Option<&FakeUser> {
        self.users.get(&(realm.to_string(), username.to_string()))
    }
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    pub store: Rc<RefCell<RealmStore>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AdminConnector for FakeConnector {
    type Admin = FakeAdmin;

    fn connect(
        &self,
        server_url: &str,
        credentials: &AdminCredentials,
        realm: &str,
    ) -> Result<FakeAdmin> {
        let mut store = self.store.borrow_mut();
        if store.rejected_users.contains(&credentials.username) {
            return Err(HarnessError::Api {
                status: 401,
                body: "invalid_grant".to_string(),
            });
        }
        store.logins.push(Login {
            server_url: server_url.to_string(),
            username: credentials.username.clone(),
            realm: realm.to_string(),
        });
        Ok(FakeAdmin {
            store: Rc::clone(&self.store),
            realm: realm.to_string(),
        })
    }
}

pub struct FakeAdmin {
    store: Rc<RefCell<RealmStore>>,
    realm: String,
}

impl FakeAdmin {
    fn key(&self, name: &str) -> (String, String) {
        (self.realm.clone(), name.to_string())
    }

    fn record(&self, call: &str) {
        self.store.borrow_mut().calls.push(call.to_string());
    }

    fn find_client_by_id(&self, id: &str) -> Option<(String, String)> {
        self.store
            .borrow()
            .clients
            .iter()
            .find(|((realm, _), client)| *realm == self.realm && client.id == id)
            .map(|(key, _)| key.clone())
    }
}

impl RealmAdmin for FakeAdmin {
    fn realm(&self) -> &str {
        &self.realm
    }

    fn set_realm(&mut self, realm: &str) {
        self.realm = realm.to_string();
    }

    fn create_realm(&self, payload: &Value) -> Result<()> {
        self.record("create_realm");
        let mut store = self.store.borrow_mut();
        let name = payload["realm"].as_str().unwrap_or_default().to_string();
        if store.realm_exists(&name) {
            return Err(HarnessError::Api {
                status: 409,
                body: "Conflict detected".to_string(),
            });
        }
        store.realms.push(payload.clone());

        let id = store.next_id("client");
        let role_id = store.next_id("role");
        store.clients.insert(
            (name, "realm-management".to_string()),
            FakeClient {
                id,
                payload: serde_json::json!({"clientId": "realm-management"}),
                secret: None,
                roles: HashMap::from([("realm-admin".to_string(), role_id)]),
            },
        );
        Ok(())
    }

    fn create_client(&self, payload: &Value) -> Result<String> {
        self.record("create_client");
        let client_id = payload["clientId"].as_str().unwrap_or_default().to_string();
        let key = self.key(&client_id);
        let mut store = self.store.borrow_mut();
        if store.clients.contains_key(&key) {
            return Err(HarnessError::Api {
                status: 409,
                body: "Client already exists".to_string(),
            });
        }
        let id = store.next_id("client");
        store.clients.insert(
            key,
            FakeClient {
                id: id.clone(),
                payload: payload.clone(),
                secret: None,
                roles: HashMap::new(),
            },
        );
        Ok(id)
    }

    fn get_client_id(&self, client_id: &str) -> Result<Option<String>> {
        self.record("get_client_id");
        Ok(self
            .store
            .borrow()
            .clients
            .get(&self.key(client_id))
            .map(|c| c.id.clone()))
    }

    fn generate_client_secrets(&self, id: &str) -> Result<ClientSecret> {
        self.record("generate_client_secrets");
        let key = self
            .find_client_by_id(id)
            .ok_or_else(|| HarnessError::not_found(id))?;
        let mut store = self.store.borrow_mut();
        let secret = store.next_id("secret");
        if let Some(client) = store.clients.get_mut(&key) {
            client.secret = Some(secret.clone());
        }
        Ok(ClientSecret {
            kind: Some("secret".to_string()),
            value: secret,
        })
    }

    fn get_client_secrets(&self, id: &str) -> Result<ClientSecret> {
        self.record("get_client_secrets");
        let key = self
            .find_client_by_id(id)
            .ok_or_else(|| HarnessError::not_found(id))?;
        let store = self.store.borrow();
        let value = store
            .clients
            .get(&key)
            .and_then(|c| c.secret.clone())
            .unwrap_or_default();
        Ok(ClientSecret {
            kind: Some("secret".to_string()),
            value,
        })
    }

    fn create_user(&self, payload: &Value) -> Result<String> {
        self.record("create_user");
        let username = payload["username"].as_str().unwrap_or_default().to_string();
        let key = self.key(&username);
        let mut store = self.store.borrow_mut();
        let id = store.next_id("user");
        store.users.insert(
            key,
            FakeUser {
                id: id.clone(),
                payload: payload.clone(),
                updates: Vec::new(),
                client_roles: Vec::new(),
            },
        );
        Ok(id)
    }

    fn get_user_id(&self, username: &str) -> Result<Option<String>> {
        self.record("get_user_id");
        Ok(self
            .store
            .borrow()
            .users
            .get(&self.key(username))
            .map(|u| u.id.clone()))
    }

    fn update_user(&self, user_id: &str, payload: &Value) -> Result<()> {
        self.record("update_user");
        let mut store = self.store.borrow_mut();
        let user = store
            .users
            .values_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| HarnessError::not_found(user_id))?;
        user.updates.push(payload.clone());
        Ok(())
    }

    fn get_client_role_id(&self, id: &str, role_name: &str) -> Result<String> {
        self.record("get_client_role_id");
        let key = self
            .find_client_by_id(id)
            .ok_or_else(|| HarnessError::not_found(id))?;
        self.store
            .borrow()
            .clients
            .get(&key)
            .and_then(|c| c.roles.get(role_name).cloned())
            .ok_or_else(|| HarnessError::not_found(role_name))
    }

    fn assign_client_role(&self, user_id: &str, id: &str, roles: &[RoleRef]) -> Result<()> {
        self.record("assign_client_role");
        let mut store = self.store.borrow_mut();
        let user = store
            .users
            .values_mut()
            .find(|u| u.id == user_id)
            .ok_or_else(|| HarnessError::not_found(user_id))?;
        for role in roles {
            user.client_roles.push((id.to_string(), role.clone()));
        }
        Ok(())
    }
}

/// A wiremock server driven from synchronous tests.
pub struct MockHttp {
    pub server: MockServer,
    rt: tokio::runtime::Runtime,
}

impl MockHttp {
    pub fn start() -> Self {
        let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
        let server = rt.block_on(MockServer::start());
        Self { server, rt }
    }

    pub fn mount(&self, mock: Mock) {
        self.rt.block_on(mock.mount(&self.server));
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn port(&self) -> u16 {
        self.server.address().port()
    }

    pub fn verify(&self) {
        self.rt.block_on(self.server.verify());
    }
}
