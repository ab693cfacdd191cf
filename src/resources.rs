//! Typed views over upstream JSON:API list items (`{id, type, attributes}`).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub organization_name: Option<String>,
    pub timezone: Option<String>,
    pub currency: Option<String>,
    pub public_api_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub name: Option<String>,
    pub status: Option<String>,
    pub channel: Option<String>,
    pub send_time: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub name: Option<String>,
    pub status: Option<String>,
    pub trigger_type: Option<String>,
    pub archived: Option<bool>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListSummary {
    pub id: String,
    pub name: Option<String>,
    pub opt_in_process: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "A: Deserialize<'de> + Default"))]
struct Resource<A> {
    id: String,
    #[serde(default)]
    attributes: A,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct AccountAttributes {
    contact_information: Option<ContactInformation>,
    timezone: Option<String>,
    preferred_currency: Option<String>,
    public_api_key: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ContactInformation {
    organization_name: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct CampaignAttributes {
    name: Option<String>,
    status: Option<String>,
    send_time: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct FlowAttributes {
    name: Option<String>,
    status: Option<String>,
    trigger_type: Option<String>,
    archived: Option<bool>,
    created: Option<String>,
    updated: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ListAttributes {
    name: Option<String>,
    opt_in_process: Option<String>,
    created: Option<String>,
    updated: Option<String>,
}

fn decode<A: DeserializeOwned + Default>(item: &Value, kind: &str) -> Option<Resource<A>> {
    match serde_json::from_value::<Resource<A>>(item.clone()) {
        Ok(resource) => Some(resource),
        Err(e) => {
            log::warn!("[Resources] Skipping undecodable {} item: {}", kind, e);
            None
        }
    }
}

pub fn decode_account(item: &Value) -> Option<Account> {
    let r = decode::<AccountAttributes>(item, "account")?;
    Some(Account {
        id: r.id,
        organization_name: r
            .attributes
            .contact_information
            .and_then(|c| c.organization_name),
        timezone: r.attributes.timezone,
        currency: r.attributes.preferred_currency,
        public_api_key: r.attributes.public_api_key,
    })
}

/// `channel` is the channel the campaign was fetched under.
pub fn decode_campaign(item: &Value, channel: &str) -> Option<Campaign> {
    let r = decode::<CampaignAttributes>(item, "campaign")?;
    Some(Campaign {
        id: r.id,
        name: r.attributes.name,
        status: r.attributes.status,
        channel: Some(channel.to_string()),
        send_time: r.attributes.send_time,
        created_at: r.attributes.created_at,
        updated_at: r.attributes.updated_at,
    })
}

pub fn decode_flow(item: &Value) -> Option<Flow> {
    let r = decode::<FlowAttributes>(item, "flow")?;
    Some(Flow {
        id: r.id,
        name: r.attributes.name,
        status: r.attributes.status,
        trigger_type: r.attributes.trigger_type,
        archived: r.attributes.archived,
        created_at: r.attributes.created,
        updated_at: r.attributes.updated,
    })
}

pub fn decode_list(item: &Value) -> Option<ListSummary> {
    let r = decode::<ListAttributes>(item, "list")?;
    Some(ListSummary {
        id: r.id,
        name: r.attributes.name,
        opt_in_process: r.attributes.opt_in_process,
        created_at: r.attributes.created,
        updated_at: r.attributes.updated,
    })
}
