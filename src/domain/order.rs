//! Read models for the host order system. The payment core reads these
//! to build the vendor checkout session; it never mutates them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub reference: String,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub title: String,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingAddress {
    pub address_1: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub postcode: Option<String>,
}

/// Everything the payment initiator needs to know about an order.
#[derive(Debug, Clone)]
pub struct OrderContext {
    pub order: Order,
    pub customer: Customer,
    pub billing: BillingAddress,
}

impl Order {
    /// Human-readable product descriptor for the vendor session: the
    /// first three item titles, with a `+ N more` suffix past that.
    pub fn product_descriptor(&self) -> String {
        if self.items.is_empty() {
            return format!("Order {}", self.reference);
        }

        let titles: Vec<&str> = self.items.iter().map(|i| i.title.as_str()).collect();
        let mut name = titles[..titles.len().min(3)].join(", ");
        if titles.len() > 3 {
            name.push_str(&format!(" + {} more", titles.len() - 3));
        }
        name
    }

    /// First category found across the line items.
    pub fn product_category(&self) -> String {
        self.items
            .iter()
            .find_map(|item| item.category.clone())
            .unwrap_or_else(|| "No specific category".to_string())
    }
}
