//! Kubo (go-ipfs) HTTP RPC client
//!
//! Every command is a `POST /api/v0/<command>` with positional arguments in
//! repeated `arg` query parameters. Failures come back as non-2xx responses
//! with a `{"Message": ..., "Code": ..., "Type": "error"}` body.

use async_trait::async_trait;
use ipt_core::config::NodeConfig;
use ipt_core::{Cid, IptError, IptResult, NamingKey};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

use crate::node::{BlockStat, ContentNode, GcSummary};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HashResponse {
    hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VersionResponse {
    version: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KeyEntry {
    name: String,
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KeyListResponse {
    #[serde(default)]
    keys: Vec<KeyEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResolveResponse {
    path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlockStatResponse {
    key: String,
    size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorResponse {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GcLine {
    #[serde(default)]
    key: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Client for one Kubo node's RPC API
#[derive(Debug, Clone)]
pub struct KuboClient {
    http: reqwest::Client,
    base: Url,
    cid_version: u8,
}

impl KuboClient {
    pub fn new(cfg: &NodeConfig) -> IptResult<Self> {
        let mut base = Url::parse(&cfg.api_url)
            .map_err(|e| IptError::Config(format!("node.api_url {:?}: {e}", cfg.api_url)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|e| IptError::storage("client_init", e))?;

        Ok(Self {
            http,
            base,
            cid_version: cfg.cid_version,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.base
    }

    fn command_url(&self, command: &str) -> IptResult<Url> {
        self.base
            .join(&format!("api/v0/{command}"))
            .map_err(|e| IptError::Config(format!("building URL for {command}: {e}")))
    }

    /// Send a command; transport errors and non-2xx replies are both errors.
    async fn send(
        &self,
        command: &str,
        query: &[(&str, &str)],
        form: Option<Form>,
    ) -> IptResult<reqwest::Response> {
        let url = self.command_url(command)?;
        trace!(%url, ?query, "kubo request");
        let mut request = self.http.post(url).query(query);
        if let Some(form) = form {
            request = request.multipart(form);
        }
        let response = request
            .send()
            .await
            .map_err(|e| IptError::storage(command, e))?;

        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        Err(IptError::storage(command, format!("{status}: {message}")))
    }

    async fn call<T: DeserializeOwned>(&self, command: &str, query: &[(&str, &str)]) -> IptResult<T> {
        let response = self.send(command, query, None).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| IptError::storage(command, format!("decoding response: {e}")))
    }
}

fn joined_path(root: &Cid, path: &str) -> String {
    let path = path.trim_matches('/');
    if path.is_empty() {
        root.ipfs_path()
    } else {
        format!("{}/{path}", root.ipfs_path())
    }
}

#[async_trait]
impl ContentNode for KuboClient {
    async fn version(&self) -> IptResult<String> {
        let v: VersionResponse = self.call("version", &[]).await?;
        Ok(v.version)
    }

    async fn add(&self, data: Vec<u8>, pin: bool) -> IptResult<Cid> {
        let len = data.len();
        let form = Form::new().part("file", Part::bytes(data).file_name("tile"));
        let cid_version = self.cid_version.to_string();
        let pin = if pin { "true" } else { "false" };
        let response = self
            .send(
                "add",
                &[("pin", pin), ("cid-version", &cid_version), ("quieter", "true")],
                Some(form),
            )
            .await?;
        let body = response
            .text()
            .await
            .map_err(|e| IptError::storage("add", e))?;
        // one JSON object per line; the final line names the added root
        let last = body
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| IptError::storage("add", "empty response"))?;
        let added: HashResponse = serde_json::from_str(last)
            .map_err(|e| IptError::storage("add", format!("decoding response: {e}")))?;
        trace!(cid = %added.hash, bytes = len, "added");
        Ok(Cid::new(added.hash))
    }

    async fn empty_directory(&self) -> IptResult<Cid> {
        let r: HashResponse = self.call("object/new", &[("arg", "unixfs-dir")]).await?;
        Ok(Cid::new(r.hash))
    }

    async fn patch_add_link(&self, parent: &Cid, path: &str, child: &Cid) -> IptResult<Cid> {
        let r: HashResponse = self
            .call(
                "object/patch/add-link",
                &[
                    ("arg", parent.as_str()),
                    ("arg", path),
                    ("arg", child.as_str()),
                    ("create", "true"),
                ],
            )
            .await?;
        Ok(Cid::new(r.hash))
    }

    async fn cat(&self, root: &Cid, path: &str) -> IptResult<Vec<u8>> {
        let target = joined_path(root, path);
        let response = self.send("cat", &[("arg", &target)], None).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| IptError::storage("cat", e))?;
        Ok(bytes.to_vec())
    }

    async fn stat(&self, cid: &Cid) -> IptResult<BlockStat> {
        let r: BlockStatResponse = self.call("block/stat", &[("arg", cid.as_str())]).await?;
        Ok(BlockStat {
            cid: Cid::new(r.key),
            size: r.size,
        })
    }

    async fn pin_add(&self, cid: &Cid) -> IptResult<()> {
        self.send("pin/add", &[("arg", cid.as_str())], None).await?;
        debug!(%cid, "pinned");
        Ok(())
    }

    async fn pin_rm(&self, cid: &Cid) -> IptResult<()> {
        self.send("pin/rm", &[("arg", cid.as_str())], None).await?;
        debug!(%cid, "unpinned");
        Ok(())
    }

    async fn key_list(&self) -> IptResult<Vec<NamingKey>> {
        let r: KeyListResponse = self.call("key/list", &[]).await?;
        Ok(r.keys
            .into_iter()
            .map(|k| NamingKey { name: k.name, id: k.id })
            .collect())
    }

    async fn key_gen(&self, name: &str, key_type: &str) -> IptResult<NamingKey> {
        let k: KeyEntry = self
            .call("key/gen", &[("arg", name), ("type", key_type)])
            .await?;
        Ok(NamingKey { name: k.name, id: k.id })
    }

    async fn key_rm(&self, name: &str) -> IptResult<()> {
        self.send("key/rm", &[("arg", name)], None).await?;
        Ok(())
    }

    async fn name_publish(&self, key: &NamingKey, cid: &Cid) -> IptResult<()> {
        let target = cid.ipfs_path();
        self.send(
            "name/publish",
            &[
                ("arg", &target),
                ("key", &key.name),
                ("allow-offline", "true"),
            ],
            None,
        )
        .await?;
        Ok(())
    }

    async fn name_resolve(&self, key: &NamingKey) -> IptResult<Option<Cid>> {
        let name = format!("/ipns/{}", key.id);
        let url = self.command_url("name/resolve")?;
        let response = self
            .http
            .post(url)
            .query(&[("arg", name.as_str()), ("recursive", "true")])
            .send()
            .await
            .map_err(|e| IptError::storage("name/resolve", e))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(key = %key.name, "name does not resolve: {body}");
            return Ok(None);
        }
        let r: ResolveResponse = response
            .json()
            .await
            .map_err(|e| IptError::storage("name/resolve", format!("decoding response: {e}")))?;
        Ok(Cid::from_ipfs_path(&r.path))
    }

    async fn repo_gc(&self) -> IptResult<GcSummary> {
        let response = self.send("repo/gc", &[], None).await?;
        let body = response
            .text()
            .await
            .map_err(|e| IptError::storage("repo/gc", e))?;
        let mut summary = GcSummary::default();
        for line in body.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<GcLine>(line) {
                Ok(GcLine { error: Some(e), .. }) => summary.errors.push(e),
                Ok(GcLine { key: Some(_), .. }) => summary.removed += 1,
                Ok(_) => {}
                Err(e) => summary.errors.push(format!("unreadable gc line: {e}")),
            }
        }
        Ok(summary)
    }
}
