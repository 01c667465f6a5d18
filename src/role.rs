//! Role membership and the administrator who grants it
use super::error::LedgerError;
use super::item::Address;
use sled::Transactional;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionalTree,
    UnabortableTransactionError, abort,
};
use std::fmt;
use tracing::info;

pub(crate) const OWNER_KEY: &str = "owner";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Producer,
    Distributor,
    Retailer,
    Consumer,
}

/// Four membership sets keyed by `role byte || address`, plus the administrator in `meta`.
///
/// Membership sets are independent: one address may hold several roles.
pub struct RoleRegistry {
    pub(crate) roles: sled::Tree,
    pub(crate) meta: sled::Tree,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::Producer,
        Role::Distributor,
        Role::Retailer,
        Role::Consumer,
    ];

    fn tag(self) -> u8 {
        match self {
            Role::Producer => 0,
            Role::Distributor => 1,
            Role::Retailer => 2,
            Role::Consumer => 3,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Producer => "producer",
            Role::Distributor => "distributor",
            Role::Retailer => "retailer",
            Role::Consumer => "consumer",
        };
        f.write_str(name)
    }
}

fn role_key(role: Role, account: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + account.as_str().len());
    key.push(role.tag());
    key.extend_from_slice(account.as_str().as_bytes());
    key
}

/// Membership check usable from inside a ledger transaction.
pub(crate) fn is_member(
    roles: &TransactionalTree,
    role: Role,
    account: &Address,
) -> Result<bool, UnabortableTransactionError> {
    Ok(roles.get(role_key(role, account))?.is_some())
}

fn ensure_owner(
    meta: &TransactionalTree,
    caller: &Address,
    action: &'static str,
) -> ConflictableTransactionResult<(), LedgerError> {
    let owner = match meta.get(OWNER_KEY)? {
        Some(bytes) => minicbor::decode::<Address>(&bytes)
            .map_err(|err| ConflictableTransactionError::Abort(err.into()))?,
        None => {
            return abort(LedgerError::Unauthorized {
                caller: caller.clone(),
                action,
            });
        }
    };
    if &owner != caller {
        return abort(LedgerError::Unauthorized {
            caller: caller.clone(),
            action,
        });
    }
    Ok(())
}

impl RoleRegistry {
    /// Open the registry, recording `owner` as administrator on first use.
    /// A store that already has a different administrator is refused.
    pub(crate) fn open(db: &sled::Db, owner: &Address) -> Result<Self, LedgerError> {
        let roles = db.open_tree("roles")?;
        let meta = db.open_tree("meta")?;
        let encoded = minicbor::to_vec(owner)?;

        meta.transaction(|meta| {
            match meta.get(OWNER_KEY)? {
                None => {
                    meta.insert(OWNER_KEY, encoded.clone())?;
                }
                Some(current) if &*current == encoded.as_slice() => {}
                Some(_) => {
                    return abort(LedgerError::Unauthorized {
                        caller: owner.clone(),
                        action: "administer this ledger",
                    });
                }
            }
            Ok(())
        })?;

        Ok(Self { roles, meta })
    }

    pub fn owner(&self) -> Result<Address, LedgerError> {
        let bytes = self
            .meta
            .get(OWNER_KEY)?
            .ok_or_else(|| LedgerError::Codec("administrator record is missing".into()))?;
        Ok(minicbor::decode(&bytes)?)
    }

    pub fn has_role(&self, role: Role, account: &Address) -> Result<bool, LedgerError> {
        Ok(self.roles.contains_key(role_key(role, account))?)
    }

    /// Current members of `role`, ordered by address
    pub fn members(&self, role: Role) -> Result<Vec<Address>, LedgerError> {
        self.roles
            .scan_prefix([role.tag()])
            .keys()
            .map(|key| -> Result<Address, LedgerError> {
                let key = key?;
                let account = std::str::from_utf8(&key[1..])
                    .map_err(|err| LedgerError::Codec(err.to_string()))?;
                Ok(Address::new(account))
            })
            .collect()
    }

    /// Grant `role` to `account`. Administrator only; granting an existing membership is refused.
    pub fn add_role(
        &self,
        caller: &Address,
        role: Role,
        account: &Address,
    ) -> Result<(), LedgerError> {
        let key = role_key(role, account);

        (&self.meta, &self.roles).transaction(|(meta, roles)| {
            ensure_owner(meta, caller, "grant roles")?;
            if roles.get(&key)?.is_some() {
                return abort(LedgerError::RoleAlreadyGranted {
                    role,
                    account: account.clone(),
                });
            }
            roles.insert(key.as_slice(), Vec::<u8>::new())?;
            Ok(())
        })?;

        info!(%role, account = %account, "role granted");
        Ok(())
    }

    /// Revoke `role` from `account`. Administrator only.
    pub fn remove_role(
        &self,
        caller: &Address,
        role: Role,
        account: &Address,
    ) -> Result<(), LedgerError> {
        let key = role_key(role, account);

        (&self.meta, &self.roles).transaction(|(meta, roles)| {
            ensure_owner(meta, caller, "revoke roles")?;
            if roles.remove(key.as_slice())?.is_none() {
                return abort(LedgerError::RoleNotHeld {
                    role,
                    account: account.clone(),
                });
            }
            Ok(())
        })?;

        info!(%role, account = %account, "role revoked");
        Ok(())
    }

    /// Give up the caller's own membership. Items already attributed to the caller keep that attribution.
    pub fn renounce_role(&self, caller: &Address, role: Role) -> Result<(), LedgerError> {
        let key = role_key(role, caller);

        self.roles.transaction(|roles| {
            if roles.remove(key.as_slice())?.is_none() {
                return abort(LedgerError::RoleNotHeld {
                    role,
                    account: caller.clone(),
                });
            }
            Ok(())
        })?;

        info!(%role, account = %caller, "role renounced");
        Ok(())
    }

    pub fn transfer_ownership(
        &self,
        caller: &Address,
        new_owner: &Address,
    ) -> Result<(), LedgerError> {
        let encoded = minicbor::to_vec(new_owner)?;

        self.meta.transaction(|meta| {
            ensure_owner(meta, caller, "transfer ownership")?;
            meta.insert(OWNER_KEY, encoded.clone())?;
            Ok(())
        })?;

        info!(from = %caller, to = %new_owner, "ownership transferred");
        Ok(())
    }
}
