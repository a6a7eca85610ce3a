pub mod cart;
pub mod cart_item;
pub mod coupon;
pub mod order;
pub mod order_item;
pub mod payment_transaction;
pub mod product;
pub mod stock_record;
pub mod stock_reservation;

pub use cart::Entity as Cart;
pub use cart_item::Entity as CartItem;
pub use coupon::Entity as Coupon;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use payment_transaction::Entity as PaymentTransaction;
pub use product::Entity as Product;
pub use stock_record::Entity as StockRecord;
pub use stock_reservation::Entity as StockReservation;
