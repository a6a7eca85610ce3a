pub mod carts;
pub mod checkout;
pub mod coupons;
pub mod payments;
pub mod reservation_sweeper;
pub mod stock_ledger;

pub use carts::CartService;
pub use checkout::CheckoutService;
pub use coupons::CouponService;
pub use payments::PaymentService;
pub use reservation_sweeper::ReservationSweeper;
pub use stock_ledger::StockLedgerService;
