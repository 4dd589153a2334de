use crate::domain::credits::CreditAccount;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct AccountRow {
    user_id: String,
    credits: u64,
    total_earned: u64,
    total_spent: u64,
}

impl From<CreditAccount> for AccountRow {
    fn from(account: CreditAccount) -> Self {
        Self {
            user_id: account.user_id.to_string(),
            credits: account.credits,
            total_earned: account.total_earned,
            total_spent: account.total_spent,
        }
    }
}

/// Writes credit accounts as CSV, one row per account, for audit exports.
pub struct AccountWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> AccountWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes every account and flushes. The header is written even when
    /// there are no accounts.
    pub fn write_accounts<I>(&mut self, accounts: I) -> Result<()>
    where
        I: IntoIterator<Item = CreditAccount>,
    {
        let mut empty = true;
        for account in accounts {
            self.writer.serialize(AccountRow::from(account))?;
            empty = false;
        }
        if empty {
            self.writer
                .write_record(["user_id", "credits", "total_earned", "total_spent"])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
