// ABOUTME: Named codebox endpoints layered on RpcClient
// ABOUTME: Auth, users, git and search bindings with their fixed paths

use serde_json::{json, Value};

use crate::error::Result;
use crate::rpc::{RequestMode, RequestOptions, RpcClient};

pub const JOIN_PATH: &str = "/auth/join";
pub const STATUS_PATH: &str = "/";
pub const PING_PATH: &str = "/auth/ping";
pub const COLLABORATORS_PATH: &str = "/users/list";
pub const GIT_STATUS_PATH: &str = "/git/status";
pub const CHANGES_PATH: &str = "/git/diff_working";
pub const COMMITS_PENDING_PATH: &str = "/git/commits_pending";
pub const SEARCH_FILES_PATH: &str = "/search/files";
pub const COMMIT_PATH: &str = "/git/commit";
pub const SYNC_PATH: &str = "/git/sync";

impl RpcClient {
    /// Join the box. Raw request: the response is not an envelope.
    pub async fn join(&self, args: Option<Value>) -> Result<Value> {
        let args = args.unwrap_or_else(|| json!({}));
        self.request(RequestMode::Post, JOIN_PATH, Some(args), RequestOptions::default())
            .await
    }

    /// Box status document. Posted like an RPC call but not unwrapped.
    pub async fn status(&self) -> Result<Value> {
        self.request(
            RequestMode::Post,
            STATUS_PATH,
            Some(json!({})),
            RequestOptions::default(),
        )
        .await
    }

    /// Tell the box the user is still here.
    pub async fn ping(&self) -> Result<Value> {
        self.call(PING_PATH, None, RequestOptions::default()).await
    }

    pub async fn collaborators(&self) -> Result<Value> {
        self.call(COLLABORATORS_PATH, None, RequestOptions::default())
            .await
    }

    pub async fn git_status(&self) -> Result<Value> {
        self.call(GIT_STATUS_PATH, None, RequestOptions::default())
            .await
    }

    /// Working tree diff.
    pub async fn changes(&self) -> Result<Value> {
        self.call(CHANGES_PATH, None, RequestOptions::default()).await
    }

    pub async fn commits_pending(&self) -> Result<Value> {
        self.call(COMMITS_PENDING_PATH, None, RequestOptions::default())
            .await
    }

    pub async fn search_files(&self, query: &str) -> Result<Value> {
        self.call(
            SEARCH_FILES_PATH,
            Some(json!({ "query": query })),
            RequestOptions::default(),
        )
        .await
    }

    /// Commit the workspace. `args` usually carries `message`.
    pub async fn commit(&self, args: Option<Value>) -> Result<Value> {
        self.call(COMMIT_PATH, args, RequestOptions::default()).await
    }

    /// Pull then push the workspace.
    pub async fn sync(&self, args: Option<Value>) -> Result<Value> {
        self.call(SYNC_PATH, args, RequestOptions::default()).await
    }
}
