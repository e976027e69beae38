use aws_config::Region;
use aws_sdk_sqs::config::{BehaviorVersion, Credentials, SharedCredentialsProvider};

use crate::config::SqsSettings;

const CREDENTIALS_PROVIDER_NAME: &str = "rs-sqs-pipeline";

/// Builds an SQS client from the default AWS provider chain.
///
/// Region and credentials come from `AWS_REGION`, `AWS_ACCESS_KEY_ID`,
/// `AWS_SECRET_ACCESS_KEY`, `AWS_PROFILE` and the shared config files.
///
/// ```rust,no_run
/// use rs_sqs_pipeline::client::create_sqs_client_from_env;
///
/// #[tokio::main]
/// async fn main() {
///     let client = create_sqs_client_from_env().await;
///     let _ = client.list_queues().send().await;
/// }
/// ```
pub async fn create_sqs_client_from_env() -> aws_sdk_sqs::Client {
    let config = aws_config::load_from_env().await;
    aws_sdk_sqs::Client::new(&config)
}

/// Builds an SQS client with a static key pair pinned to `region`.
///
/// Nothing is read from the environment.
///
/// ```rust
/// use rs_sqs_pipeline::client::create_sqs_client_with_credentials;
///
/// let client = create_sqs_client_with_credentials("AKIDEXAMPLE", "secret", "eu-west-1");
/// assert_eq!(client.config().region().map(|r| r.as_ref()), Some("eu-west-1"));
/// ```
pub fn create_sqs_client_with_credentials(
    access_key_id: &str,
    secret_access_key: &str,
    region: &str,
) -> aws_sdk_sqs::Client {
    let config = aws_sdk_sqs::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .credentials_provider(SharedCredentialsProvider::new(static_credentials(
            access_key_id,
            secret_access_key,
        )))
        .build();

    aws_sdk_sqs::Client::from_conf(config)
}

/// Builds the client described by [`SqsSettings`].
///
/// With no region, credentials or endpoint set this is
/// [`create_sqs_client_from_env`]. Otherwise the settings override the
/// matching parts of the default chain.
pub async fn create_sqs_client(settings: &SqsSettings) -> aws_sdk_sqs::Client {
    if settings.region.is_none() && settings.access_key.is_none() && settings.endpoint_url.is_none()
    {
        return create_sqs_client_from_env().await;
    }

    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = &settings.region {
        loader = loader.region(Region::new(region.clone()));
    }
    if let (Some(key), Some(secret)) = (&settings.access_key, &settings.access_secret) {
        loader = loader.credentials_provider(static_credentials(key, secret));
    }
    if let Some(endpoint) = &settings.endpoint_url {
        loader = loader.endpoint_url(endpoint.as_str());
    }

    aws_sdk_sqs::Client::new(&loader.load().await)
}

fn static_credentials(access_key_id: &str, secret_access_key: &str) -> Credentials {
    Credentials::new(
        access_key_id,
        secret_access_key,
        None,
        None,
        CREDENTIALS_PROVIDER_NAME,
    )
}
