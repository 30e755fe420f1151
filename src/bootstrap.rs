use async_trait::async_trait;
use log::info;
use reqwest::multipart;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::ChannelError;
use crate::models::chat::{ Conversation, ConversationStatus, Message, Participant, Role };
use crate::store::ConversationStore;

#[derive(Clone, Debug, Deserialize)]
pub struct ConversationHistory {
    pub conversation: Conversation,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub participants: Vec<Participant>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct OrderLookup {
    pub exists: bool,
    #[serde(default)]
    pub conversation: Option<Conversation>,
}

/// Row in the merchant inbox listing.
#[derive(Clone, Debug, Deserialize)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    #[serde(default)]
    pub last_message: Option<Message>,
    #[serde(default)]
    pub unread_count: u32,
}

#[derive(Clone, Debug, Default)]
pub struct InboxFilter {
    pub status: Option<ConversationStatus>,
    pub search: Option<String>,
}

impl InboxFilter {
    fn query(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        if let Some(status) = self.status {
            let value = match status {
                ConversationStatus::Active => "active",
                ConversationStatus::Closed => "closed",
                ConversationStatus::Archived => "archived",
            };
            params.push(("status", value.to_string()));
        }
        if let Some(search) = &self.search {
            params.push(("search", search.clone()));
        }
        params
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    media_url: String,
}

/// Read-path seam used by the channel manager's rider-assignment reload.
#[async_trait]
pub trait ConversationApi: Send + Sync + 'static {
    async fn fetch_conversation(
        &self,
        conversation_id: &str
    ) -> Result<ConversationHistory, ChannelError>;
}

/// REST collaborator client. History reads and media uploads only; all
/// realtime traffic goes over the channel.
#[derive(Clone)]
pub struct HttpApiClient {
    http: reqwest::Client,
    base_url: String,
    website_id: String,
}

impl HttpApiClient {
    pub fn new(base_url: impl Into<String>, website_id: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            website_id: website_id.into(),
        }
    }

    pub async fn conversation(
        &self,
        conversation_id: &str
    ) -> Result<ConversationHistory, ChannelError> {
        let url = format!("{}/conversations/{}", self.base_url, conversation_id);
        let response = self.http
            .get(&url)
            .query(&[("website_id", self.website_id.as_str())])
            .send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ChannelError::ConversationNotFound(conversation_id.to_string()));
        }
        Ok(response.error_for_status()?.json::<ConversationHistory>().await?)
    }

    pub async fn conversation_by_order(
        &self,
        order_id: &str
    ) -> Result<OrderLookup, ChannelError> {
        let url = format!("{}/conversations/by-order/{}", self.base_url, order_id);
        let response = self.http
            .get(&url)
            .query(&[("website_id", self.website_id.as_str())])
            .send().await?;
        Ok(response.error_for_status()?.json::<OrderLookup>().await?)
    }

    /// Merchant inbox: list conversations for the tenant, optionally
    /// filtered by status or a search string.
    pub async fn list_conversations(
        &self,
        filter: &InboxFilter
    ) -> Result<Vec<ConversationSummary>, ChannelError> {
        let url = format!("{}/conversations", self.base_url);
        let mut params = filter.query();
        params.push(("website_id", self.website_id.clone()));
        let response = self.http.get(&url).query(&params).send().await?;
        Ok(response.error_for_status()?.json::<Vec<ConversationSummary>>().await?)
    }

    /// Plain chat image upload. The caller surfaces failures as a transient
    /// banner; there is no automatic retry here.
    pub async fn upload_image(
        &self,
        conversation_id: &str,
        sender_role: Role,
        sender_id: &str,
        sender_name: &str,
        filename: &str,
        bytes: Vec<u8>
    ) -> Result<String, ChannelError> {
        let form = multipart::Form
            ::new()
            .text("conversation_id", conversation_id.to_string())
            .text("sender_role", sender_role.as_str())
            .text("sender_id", sender_id.to_string())
            .text("sender_name", sender_name.to_string())
            .part("image", multipart::Part::bytes(bytes).file_name(filename.to_string()));
        self.upload(format!("{}/uploads/chat-image", self.base_url), form).await
    }

    /// Payment-proof upload, additionally bound to the order and amount the
    /// proof claims to settle.
    pub async fn upload_payment_proof(
        &self,
        conversation_id: &str,
        sender_role: Role,
        sender_id: &str,
        sender_name: &str,
        order_id: &str,
        amount: f64,
        filename: &str,
        bytes: Vec<u8>
    ) -> Result<String, ChannelError> {
        let form = multipart::Form
            ::new()
            .text("conversation_id", conversation_id.to_string())
            .text("sender_role", sender_role.as_str())
            .text("sender_id", sender_id.to_string())
            .text("sender_name", sender_name.to_string())
            .text("order_id", order_id.to_string())
            .text("amount", amount.to_string())
            .part("image", multipart::Part::bytes(bytes).file_name(filename.to_string()));
        self.upload(format!("{}/uploads/payment-proof", self.base_url), form).await
    }

    async fn upload(&self, url: String, form: multipart::Form) -> Result<String, ChannelError> {
        let response = self.http
            .post(&url)
            .multipart(form)
            .send().await
            .map_err(|e| ChannelError::Upload(e.to_string()))?;
        let body = response
            .error_for_status()
            .map_err(|e| ChannelError::Upload(e.to_string()))?
            .json::<UploadResponse>().await
            .map_err(|e| ChannelError::Upload(e.to_string()))?;
        Ok(body.media_url)
    }
}

#[async_trait]
impl ConversationApi for HttpApiClient {
    async fn fetch_conversation(
        &self,
        conversation_id: &str
    ) -> Result<ConversationHistory, ChannelError> {
        self.conversation(conversation_id).await
    }
}

/// One-shot session bootstrap: fetch the full history and participant list,
/// build and populate the store, then hand off to the channel manager.
/// Failure here is terminal for the screen; any retry is a caller-side
/// affordance.
pub struct SessionBootstrapper {
    api: Arc<dyn ConversationApi>,
}

impl SessionBootstrapper {
    pub fn new(api: Arc<dyn ConversationApi>) -> Self {
        Self { api }
    }

    pub async fn bootstrap(
        &self,
        conversation_id: &str,
        local_role: Role
    ) -> Result<Arc<Mutex<ConversationStore>>, ChannelError> {
        info!("Loading history for conversation {}", conversation_id);
        let history = self.api.fetch_conversation(conversation_id).await?;
        info!(
            "History loaded: {} messages, {} participants",
            history.messages.len(),
            history.participants.len()
        );
        let mut store = ConversationStore::new(history.conversation, local_role);
        store.load_history(history.messages, history.participants);
        Ok(Arc::new(Mutex::new(store)))
    }
}
