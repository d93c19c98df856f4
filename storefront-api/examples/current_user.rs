use secrecy::SecretString;
use storefront_api::{Authorized, Client, DEFAULT_BASE_URL, Request, StorefrontApiError};

#[tokio::main]
pub async fn main() -> Result<(), StorefrontApiError> {
    let client = Client::new(DEFAULT_BASE_URL);

    let token = SecretString::from("id_token".to_string());
    let req = Authorized::bearer(Request::users().me(), token);

    let _me = client.send_authorized(req).await?;
    Ok(())
}
