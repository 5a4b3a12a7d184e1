//! One method per backend endpoint. Bodies are passed through as JSON; the
//! backend owns their schemas.

use crate::client::KinKeepClient;
use crate::error::ApiError;
use crate::request::{PendingRequest, RequestOptions, UploadForm};
use crate::types::{PasswordChange, SettingsSection};
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::fmt::Display;

pub const UPLOAD_PATH: &str = "/upload";

fn segment(id: impl Display) -> String {
    urlencoding::encode(&id.to_string()).into_owned()
}

impl KinKeepClient {
    // users

    pub async fn get_current_user(&self) -> Result<Value, ApiError> {
        self.get("/users/me").await
    }

    pub async fn update_profile(&self, profile: Value) -> Result<Value, ApiError> {
        self.put("/users/me", profile).await
    }

    pub async fn change_password(&self, change: &PasswordChange) -> Result<Value, ApiError> {
        self.post("/users/change-password", Some(serde_json::to_value(change)?))
            .await
    }

    pub async fn update_settings(
        &self,
        section: SettingsSection,
        settings: Value,
    ) -> Result<Value, ApiError> {
        let mut body = Map::new();
        body.insert(section.key().to_string(), settings);
        self.put("/users/settings", Value::Object(body)).await
    }

    pub async fn update_privacy_settings(&self, settings: Value) -> Result<Value, ApiError> {
        self.update_settings(SettingsSection::Privacy, settings).await
    }

    pub async fn update_security_settings(&self, settings: Value) -> Result<Value, ApiError> {
        self.update_settings(SettingsSection::Security, settings).await
    }

    pub async fn update_notification_settings(&self, settings: Value) -> Result<Value, ApiError> {
        self.update_settings(SettingsSection::Notifications, settings)
            .await
    }

    pub async fn delete_account(&self) -> Result<Value, ApiError> {
        self.delete("/users/me").await
    }

    // families

    pub async fn get_families(&self) -> Result<Value, ApiError> {
        self.get("/families").await
    }

    pub async fn create_family(&self, family: Value) -> Result<Value, ApiError> {
        self.post("/families", Some(family)).await
    }

    pub async fn get_family(&self, family_id: impl Display) -> Result<Value, ApiError> {
        self.get(&format!("/families/{}", segment(family_id))).await
    }

    // stories

    pub async fn get_stories(&self, options: RequestOptions) -> Result<Value, ApiError> {
        self.get_with("/stories", options).await
    }

    pub async fn create_story(&self, story: Value) -> Result<Value, ApiError> {
        self.post("/stories", Some(story)).await
    }

    pub async fn get_story(&self, story_id: impl Display) -> Result<Value, ApiError> {
        self.get(&format!("/stories/{}", segment(story_id))).await
    }

    pub async fn update_story(
        &self,
        story_id: impl Display,
        story: Value,
    ) -> Result<Value, ApiError> {
        self.put(&format!("/stories/{}", segment(story_id)), story)
            .await
    }

    pub async fn enhance_story(&self, story_id: impl Display) -> Result<Value, ApiError> {
        self.post(&format!("/stories/{}/enhance", segment(story_id)), None)
            .await
    }

    pub async fn accept_enhancement(
        &self,
        story_id: impl Display,
        accept: bool,
    ) -> Result<Value, ApiError> {
        self.post(
            &format!("/stories/{}/accept-enhancement", segment(story_id)),
            Some(json!({ "accept": accept })),
        )
        .await
    }

    // posts

    pub async fn get_posts(&self, options: RequestOptions) -> Result<Value, ApiError> {
        self.get_with("/posts", options).await
    }

    pub async fn create_post(&self, post: Value) -> Result<Value, ApiError> {
        self.post("/posts", Some(post)).await
    }

    pub async fn like_post(&self, post_id: impl Display) -> Result<Value, ApiError> {
        self.post(&format!("/posts/{}/like", segment(post_id)), None)
            .await
    }

    pub async fn comment_on_post(
        &self,
        post_id: impl Display,
        content: &str,
    ) -> Result<Value, ApiError> {
        self.post(
            &format!("/posts/{}/comments", segment(post_id)),
            Some(json!({ "content": content })),
        )
        .await
    }

    // follows

    pub async fn follow_user(&self, user_id: impl Display) -> Result<Value, ApiError> {
        self.post(&format!("/users/{}/follow", segment(user_id)), None)
            .await
    }

    pub async fn get_followers(&self, user_id: impl Display) -> Result<Value, ApiError> {
        self.get(&format!("/users/{}/followers", segment(user_id)))
            .await
    }

    pub async fn get_following(&self, user_id: impl Display) -> Result<Value, ApiError> {
        self.get(&format!("/users/{}/following", segment(user_id)))
            .await
    }

    // messaging

    pub async fn get_conversations(&self) -> Result<Value, ApiError> {
        self.get("/conversations").await
    }

    pub async fn create_conversation(
        &self,
        participant_ids: &[Value],
        name: Option<&str>,
    ) -> Result<Value, ApiError> {
        self.post(
            "/conversations",
            Some(json!({ "participant_ids": participant_ids, "name": name })),
        )
        .await
    }

    pub async fn get_messages(
        &self,
        conversation_id: impl Display,
        options: RequestOptions,
    ) -> Result<Value, ApiError> {
        self.get_with(
            &format!("/conversations/{}/messages", segment(conversation_id)),
            options,
        )
        .await
    }

    pub async fn send_message(
        &self,
        conversation_id: impl Display,
        message: Value,
    ) -> Result<Value, ApiError> {
        self.post(
            &format!("/conversations/{}/messages", segment(conversation_id)),
            Some(message),
        )
        .await
    }

    pub async fn search_users(&self, query: &str) -> Result<Value, ApiError> {
        self.get_with("/search/users", RequestOptions::default().with_query("q", query))
            .await
    }

    /// Multipart `POST /upload` with `file`, `type`, and `folder` fields.
    pub async fn upload(&self, form: UploadForm) -> Result<Value, ApiError> {
        let request = PendingRequest::new(Method::POST, UPLOAD_PATH).with_body(form);
        self.send(request).await
    }
}
