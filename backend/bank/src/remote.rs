use anyhow::{Context, Error};
use prost::Message;
use reqwest::get;

use crate::menu::Bank;

pub async fn get_remote_bank(url: &str) -> Result<Bank, Error> {
    let response = get(url)
        .await
        .with_context(|| format!("fetching menu bank from {url}"))?
        .error_for_status()?;
    let bytes = response.bytes().await?;

    Ok(Bank::decode(&*bytes)?)
}
