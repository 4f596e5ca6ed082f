//! Test support: a ticket forge holding a known service key.
//!
//! Plays the part of the KDC and the client so tests can mint tokens that
//! the validator accepts or rejects in controlled ways.

#![allow(clippy::disallowed_methods)]

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use krbgate_crypto::keytab::NT_PRINCIPAL;
use krbgate_crypto::{key_usage, EncryptionKey, EncryptionType, Keytab, KeytabEntry};

use crate::gss;
use crate::messages::{
    ap_options, ticket_flags, ApReq, Authenticator, EncTicketPart, EncryptedData, KeyBlock,
    PrincipalName, Ticket,
};
use crate::negotiate::NegTokenInit;

/// Realm used by the forge.
pub const REALM: &str = "EXAMPLE.COM";

/// Service account present in [`service_keytab`].
pub const SERVICE_ACCOUNT: &str = "testuser";

/// Key version of every entry in [`service_keytab`].
pub const SERVICE_KVNO: u32 = 3;

/// Deterministic service key for an encryption type.
pub fn service_key_for(etype: EncryptionType) -> EncryptionKey {
    let bytes: Vec<u8> = (0..etype.key_size())
        .map(|i| (i as u8).wrapping_mul(7) ^ etype.id() as u8)
        .collect();
    EncryptionKey::from_bytes(etype, &bytes).expect("key length matches etype")
}

/// Keytab holding [`SERVICE_ACCOUNT`] keys for every supported etype.
pub fn service_keytab() -> Keytab {
    let mut keytab = Keytab::new();
    for etype in EncryptionType::ALL {
        keytab.push(KeytabEntry::new(
            REALM,
            vec![SERVICE_ACCOUNT.to_string()],
            SERVICE_KVNO,
            1_700_000_000,
            &service_key_for(etype),
        ));
    }
    keytab
}

/// Builder for AP-REQ tokens.
#[derive(Debug, Clone)]
pub struct TicketForge {
    client: Vec<String>,
    realm: String,
    authenticator_client: Option<Vec<String>>,
    etype: EncryptionType,
    kvno: Option<u32>,
    service_key: Option<EncryptionKey>,
    session_key: EncryptionKey,
    authtime: DateTime<Utc>,
    authenticator_time: Option<DateTime<Utc>>,
    lifetime: Duration,
    flags: u32,
    mutual: bool,
}

impl TicketForge {
    /// Starts a ticket for `client` in [`REALM`], issued now.
    pub fn new(client: &str) -> Self {
        let etype = EncryptionType::Aes256CtsHmacSha196;
        Self {
            client: vec![client.to_string()],
            realm: REALM.to_string(),
            authenticator_client: None,
            etype,
            kvno: Some(SERVICE_KVNO),
            service_key: None,
            session_key: EncryptionKey::generate(etype),
            authtime: Utc::now(),
            authenticator_time: None,
            lifetime: Duration::hours(10),
            flags: ticket_flags::PRE_AUTHENT,
            mutual: false,
        }
    }

    /// Appends an instance component (`client/instance`).
    pub fn instance(mut self, instance: &str) -> Self {
        self.client.push(instance.to_string());
        self
    }

    /// Realm of both the client and the ticket.
    pub fn realm(mut self, realm: &str) -> Self {
        self.realm = realm.to_string();
        self
    }

    /// Encryption type of the ticket and the session key.
    pub fn etype(mut self, etype: EncryptionType) -> Self {
        self.etype = etype;
        self.session_key = EncryptionKey::generate(etype);
        self
    }

    /// Key version advertised in the ticket.
    pub fn kvno(mut self, kvno: Option<u32>) -> Self {
        self.kvno = kvno;
        self
    }

    /// Encrypts the ticket with a different service key.
    pub fn service_key(mut self, key: EncryptionKey) -> Self {
        self.etype = key.etype();
        self.session_key = EncryptionKey::generate(key.etype());
        self.service_key = Some(key);
        self
    }

    /// Issue time; the authenticator uses it too unless overridden.
    pub fn at(mut self, authtime: DateTime<Utc>) -> Self {
        self.authtime = authtime;
        self
    }

    /// Client timestamp in the authenticator.
    pub fn authenticator_time(mut self, time: DateTime<Utc>) -> Self {
        self.authenticator_time = Some(time);
        self
    }

    /// Adds ticket flags.
    pub fn ticket_flags(mut self, flags: u32) -> Self {
        self.flags |= flags;
        self
    }

    /// Names a different client in the authenticator.
    pub fn authenticator_client(mut self, client: &str) -> Self {
        self.authenticator_client = Some(vec![client.to_string()]);
        self
    }

    /// Requests mutual authentication.
    pub fn mutual(mut self, mutual: bool) -> Self {
        self.mutual = mutual;
        self
    }

    /// Session key embedded in the ticket.
    pub fn session_key(&self) -> &EncryptionKey {
        &self.session_key
    }

    /// Bare encoded AP-REQ.
    pub fn ap_req(&self) -> Vec<u8> {
        let service_key = self
            .service_key
            .clone()
            .unwrap_or_else(|| service_key_for(self.etype));
        let cname = PrincipalName::new(NT_PRINCIPAL as i32, self.client.clone());

        let enc_ticket = EncTicketPart {
            flags: self.flags,
            key: KeyBlock::from_key(&self.session_key),
            crealm: self.realm.clone(),
            cname: cname.clone(),
            authtime: self.authtime,
            starttime: None,
            endtime: self.authtime + self.lifetime,
            renew_till: None,
        };
        let ticket = Ticket {
            realm: self.realm.clone(),
            sname: PrincipalName::new(2, vec!["HTTP".into(), "vault.example.com".into()]),
            enc_part: EncryptedData::seal(
                &service_key,
                key_usage::TICKET,
                self.kvno,
                &enc_ticket.encode().expect("ticket encoding"),
            )
            .expect("ticket encryption"),
        };

        let authenticator = Authenticator {
            crealm: self.realm.clone(),
            cname: self
                .authenticator_client
                .clone()
                .map_or(cname, |c| PrincipalName::new(NT_PRINCIPAL as i32, c)),
            cksum: None,
            cusec: 0,
            ctime: self.authenticator_time.unwrap_or(self.authtime),
            subkey: None,
            seq_number: Some(1),
        };

        ApReq {
            ap_options: if self.mutual {
                ap_options::MUTUAL_REQUIRED
            } else {
                0
            },
            ticket,
            authenticator: EncryptedData::seal(
                &self.session_key,
                key_usage::AP_REQ_AUTHENTICATOR,
                None,
                &authenticator.encode().expect("authenticator encoding"),
            )
            .expect("authenticator encryption"),
        }
        .encode()
        .expect("AP-REQ encoding")
    }

    /// AP-REQ framed as a krb5 GSS token.
    pub fn krb5(&self) -> Vec<u8> {
        gss::wrap_krb5(gss::TOK_ID_AP_REQ, &self.ap_req()).expect("krb5 framing")
    }

    /// SPNEGO NegTokenInit carrying the krb5 token optimistically.
    pub fn spnego(&self) -> Vec<u8> {
        let mech_token = self.krb5();
        NegTokenInit {
            mech_types: vec![gss::OID_KRB5, gss::OID_MS_KRB5],
            mech_token: Some(mech_token.as_slice()),
        }
        .encode()
        .expect("NegTokenInit encoding")
    }

    /// `Authorization` header value carrying [`Self::spnego`].
    pub fn authorization(&self) -> String {
        format!("Negotiate {}", BASE64.encode(self.spnego()))
    }
}
