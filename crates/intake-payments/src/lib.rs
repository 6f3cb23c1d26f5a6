//! Client for the Pesapal v3 payment gateway: request a bearer token, submit
//! an order, and poll a transaction's status.

pub mod error;
pub mod gateway;
pub mod pesapal;

pub use error::PaymentError;
pub use gateway::{BillingAddress, OrderRequest, OrderResponse, PaymentGateway, TransactionStatus};
pub use pesapal::{PesapalClient, PesapalConfig};
