//! The Mojang session-server collaborator: turns a completed encryption handshake into a
//! verified player profile.

use crate::authentication::minecraft_hash;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::instrument;
use uuid::Uuid;

/// The shared http client used for every Mojang request made by this process.
static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .build()
        .expect("failed to create http client")
});

/// A single Minecraft user profile as returned by `hasJoined`.
///
/// `properties` usually holds exactly one `textures` entry; it is kept as a vec since that is
/// what the JSON response actually declares.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub properties: Vec<ProfileProperty>,
}

/// A single signed property of a Minecraft user profile, most commonly the `textures` skin
/// property.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProfileProperty {
    pub name: String,
    pub value: String,
    pub signature: Option<String>,
}

/// Errors from the Mojang round trip, distinguishing a transport failure from an explicit
/// refusal (bad status code, name mismatch).
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("session server request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("session server rejected the request with status {0}")]
    RefusedStatus(reqwest::StatusCode),
    #[error("client's username did not match Mojang's record")]
    UsernameMismatch,
}

#[async_trait]
pub trait Mojang: Send + Sync {
    async fn authenticate(
        &self,
        username: &str,
        shared_secret: &[u8],
        server_id: &str,
        encoded_public: &[u8],
    ) -> Result<Profile, Error>;
}

/// The real Mojang session-server client, used whenever online-mode is enabled.
#[derive(Default)]
pub struct Api {}

#[async_trait]
impl Mojang for Api {
    #[instrument(skip_all)]
    async fn authenticate(
        &self,
        username: &str,
        shared_secret: &[u8],
        server_id: &str,
        encoded_public: &[u8],
    ) -> Result<Profile, Error> {
        let hash = minecraft_hash(server_id, shared_secret, encoded_public);

        let url = format!(
            "https://sessionserver.mojang.com/session/minecraft/hasJoined?username={username}&serverId={hash}"
        );
        let response = HTTP_CLIENT.get(&url).send().await?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(Error::RefusedStatus(response.status()));
        }

        let profile: Profile = response.json().await?;
        if profile.name != username {
            return Err(Error::UsernameMismatch);
        }

        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockMojang {
        profile: Profile,
    }

    #[async_trait]
    impl Mojang for MockMojang {
        async fn authenticate(
            &self,
            _username: &str,
            _shared_secret: &[u8],
            _server_id: &str,
            _encoded_public: &[u8],
        ) -> Result<Profile, Error> {
            Ok(self.profile.clone())
        }
    }

    #[tokio::test]
    async fn mock_authenticate_returns_configured_profile() {
        let mojang = MockMojang {
            profile: Profile {
                id: Uuid::nil(),
                name: "Notch".to_string(),
                properties: vec![],
            },
        };

        let profile = mojang
            .authenticate("Notch", &[], "server", &[])
            .await
            .unwrap();
        assert_eq!(profile.name, "Notch");
    }
}
