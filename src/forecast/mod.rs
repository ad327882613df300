pub mod prices;
pub mod weather;

pub use prices::{get_cheapest_slots, PriceManager, PriceManagerConfig};
pub use weather::{required_slots, Forecast, WeatherManager, WeatherManagerConfig};
