//! Order destinations (FTP servers and physical delivery addresses).

use anyhow::{Result, bail};
use reqwest::Method;
use serde_json::{Value, json};
use tracing::info;

use crate::client::Client;

#[derive(Clone, Default, PartialEq)]
pub struct FtpDestination {
    pub name: String,
    /// Fully qualified domain name of the FTP server.
    pub hostname: String,
    pub username: String,
    pub password: String,
    /// Readable form, typically `ftp://{user}@{host}/{path}`.
    pub string_value: Option<String>,
    /// Directory to change into after logging in; the root when unset.
    pub path: Option<String>,
    pub can_edit: Option<bool>,
}

impl std::fmt::Debug for FtpDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpDestination")
            .field("name", &self.name)
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("password", &"***")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhysicalDestination {
    pub name: String,
    pub customer_name: String,
    pub contact_email: String,
    pub organization: Option<String>,
    pub phone: Option<String>,
    /// One to three address lines.
    pub addresses: Vec<String>,
    pub city: String,
    pub state_prov: Option<String>,
    pub country: String,
    pub postal_code: Option<String>,
    pub classification: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Destination {
    Ftp(FtpDestination),
    Physical(PhysicalDestination),
}

impl Destination {
    /// `FTP` or `Physical`, as used in destination URLs.
    pub fn type_name(&self) -> &'static str {
        match self {
            Destination::Ftp(_) => "FTP",
            Destination::Physical(_) => "Physical",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Destination::Ftp(d) => &d.name,
            Destination::Physical(d) => &d.name,
        }
    }

    /// Request body for the destination endpoints, also usable as an entry
    /// of [`crate::OrderOptions::destinations`].
    pub fn to_json(&self) -> Result<Value> {
        let mut out = json!({ "type": self.type_name(), "name": self.name() });
        match self {
            Destination::Ftp(d) => {
                out["hostname"] = json!(d.hostname);
                out["username"] = json!(d.username);
                out["password"] = json!(d.password);
                if let Some(s) = &d.string_value {
                    out["stringValue"] = json!(s);
                }
                if let Some(p) = &d.path {
                    out["path"] = json!(p);
                }
                if let Some(c) = d.can_edit {
                    out["canEdit"] = json!(c.to_string());
                }
            }
            Destination::Physical(d) => {
                if d.addresses.is_empty() {
                    bail!("physical destination '{}' needs at least one address", d.name);
                }
                out["customerName"] = json!(d.customer_name);
                out["contactEmail"] = json!(d.contact_email);
                if let Some(o) = &d.organization {
                    out["organization"] = json!(o);
                }
                if let Some(p) = &d.phone {
                    out["phone"] = json!(p);
                }
                for (i, addr) in d.addresses.iter().take(3).enumerate() {
                    out[format!("addr{}", i + 1)] = json!(addr);
                }
                out["city"] = json!(d.city);
                out["stateProv"] = json!(d.state_prov);
                out["country"] = json!(d.country);
                out["postalCode"] = json!(d.postal_code);
                if let Some(c) = &d.classification {
                    out["classification"] = json!(c);
                }
            }
        }
        Ok(out)
    }
}

impl Client {
    pub fn create_destination(&self, dest: &Destination) -> Result<Value> {
        info!(kind = dest.type_name(), name = dest.name(), "Creating destination...");
        let body = dest.to_json()?;
        let url = self.url(&["order", "destinations"], &[])?;
        self.api_json(Method::POST, &url, Some(&body), self.order_timeout())
    }

    /// Replaces the destination with the same type and name.
    pub fn edit_destination(&self, dest: &Destination) -> Result<Value> {
        info!(kind = dest.type_name(), name = dest.name(), "Updating destination...");
        let body = dest.to_json()?;
        let url = self.url(&["order", "destinations", dest.type_name(), dest.name()], &[])?;
        self.api_json(Method::PUT, &url, Some(&body), self.order_timeout())
    }

    pub fn delete_destination(&self, type_name: &str, name: &str) -> Result<Value> {
        info!(kind = type_name, name, "Deleting destination...");
        let url = self.url(&["order", "destinations", type_name, name], &[])?;
        self.api_json::<Value, Value>(Method::DELETE, &url, None, self.order_timeout())
    }

    /// Destinations of the account, or those valid for one image when
    /// `image` is `(collection, record_id)`.
    pub fn retrieve_destinations(&self, image: Option<(&str, &str)>) -> Result<Value> {
        info!("Retrieving list of destinations...");
        let url = match image {
            Some((collection, record_id)) => self.url(
                &["order", "destinations"],
                &[("collection", collection), ("recordId", record_id)],
            )?,
            None => self.url(&["order", "destinations"], &[])?,
        };
        self.get_json(&url, self.query_timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ftp_body() {
        let dest = Destination::Ftp(FtpDestination {
            name: "lab".into(),
            hostname: "ftp.example.com".into(),
            username: "eo".into(),
            password: "secret".into(),
            path: Some("/incoming".into()),
            can_edit: Some(true),
            ..Default::default()
        });
        assert_eq!(
            dest.to_json().unwrap(),
            json!({"type": "FTP", "name": "lab", "hostname": "ftp.example.com",
                   "username": "eo", "password": "secret", "path": "/incoming", "canEdit": "true"})
        );
        assert!(!format!("{dest:?}").contains("secret"));
    }

    #[test]
    fn physical_body_keeps_three_addresses() {
        let mut d = PhysicalDestination {
            name: "office".into(),
            customer_name: "A. Reader".into(),
            contact_email: "reader@example.com".into(),
            addresses: vec!["1 Main".into(), "Unit 2".into(), "Floor 3".into(), "extra".into()],
            city: "Ottawa".into(),
            state_prov: Some("ON".into()),
            country: "Canada".into(),
            ..Default::default()
        };
        let body = Destination::Physical(d.clone()).to_json().unwrap();
        assert_eq!(body["type"], "Physical");
        assert_eq!(body["addr3"], "Floor 3");
        assert!(body.get("addr4").is_none());
        assert_eq!(body["postalCode"], Value::Null);

        d.addresses.clear();
        assert!(Destination::Physical(d).to_json().is_err());
    }
}
