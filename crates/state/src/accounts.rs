//! Account record access through a state view.

use nhb_api::storage::StateAccess;
use nhb_types::account::Account;
use nhb_types::address::Address;
use nhb_types::amount::Amount;
use nhb_types::codec::{from_bytes_canonical, to_bytes_canonical};
use nhb_types::error::TxError;
use nhb_types::keys::account_key;

/// Loads an account, defaulting to the empty record for untouched addresses.
pub fn get_account(state: &dyn StateAccess, addr: &Address) -> Result<Account, TxError> {
    match state.get(&account_key(addr))? {
        Some(bytes) => Ok(from_bytes_canonical(&bytes)?),
        None => Ok(Account::default()),
    }
}

/// Persists an account record.
pub fn put_account(
    state: &mut dyn StateAccess,
    addr: &Address,
    account: &Account,
) -> Result<(), TxError> {
    state.insert(&account_key(addr), &to_bytes_canonical(account))?;
    Ok(())
}

/// Debits `amount` from the native balance, failing on insufficient funds.
pub fn debit_native(account: &mut Account, amount: &Amount) -> Result<(), TxError> {
    account.balance = account
        .balance
        .checked_sub(amount)
        .ok_or(TxError::InsufficientBalance)?;
    Ok(())
}

/// Debits `amount` from the wrapped balance, failing on insufficient funds.
pub fn debit_wrapped(account: &mut Account, amount: &Amount) -> Result<(), TxError> {
    account.balance_wrapped = account
        .balance_wrapped
        .checked_sub(amount)
        .ok_or(TxError::InsufficientBalance)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::{Overlay, ScratchView};
    use nhb_storage::MemStore;

    #[test]
    fn missing_account_is_default() {
        let store = MemStore::new();
        let block = Overlay::new();
        let view = ScratchView::new(&store, &block);
        let account = get_account(&view, &Address([7; 20])).unwrap();
        assert_eq!(account, Account::default());
    }

    #[test]
    fn debit_checks_balance() {
        let mut account = Account {
            balance: Amount::from(10u64),
            ..Account::default()
        };
        assert!(debit_native(&mut account, &Amount::from(4u64)).is_ok());
        assert!(matches!(
            debit_native(&mut account, &Amount::from(7u64)),
            Err(TxError::InsufficientBalance)
        ));
        assert_eq!(account.balance, Amount::from(6u64));
    }
}
