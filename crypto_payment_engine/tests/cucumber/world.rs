use std::{collections::HashMap, fmt::Debug};

use crypto_payment_engine::{db_types::InvoiceId, InvoiceFlowError};
use cucumber::World;

use crate::support::TestSystem;

#[derive(Default, World)]
pub struct InvoiceWorld {
    pub system: Option<TestSystem>,
    /// Invoices by the name the scenario gave them.
    pub invoices: HashMap<String, InvoiceId>,
    pub last_error: Option<InvoiceFlowError>,
}

impl Debug for InvoiceWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let db = self.system.as_ref().map(|s| s.url.as_str()).unwrap_or("none");
        write!(f, "InvoiceWorld (db: {db}, invoices: {:?}, last error: {:?})", self.invoices, self.last_error)
    }
}

impl InvoiceWorld {
    pub fn system(&self) -> &TestSystem {
        self.system.as_ref().expect("Payment system not initialised")
    }

    pub fn invoice_id(&self, name: &str) -> InvoiceId {
        self.invoices.get(name).cloned().unwrap_or_else(|| panic!("No invoice called {name}"))
    }
}
