use app_config::{AppConfig, ShopSettings};
use std::time::Duration;

#[test]
fn test_load_default_config() {
    let cfg = AppConfig::load().unwrap();
    assert_eq!(cfg.paytr_iframe_url, "https://www.paytr.com/odeme/guvenli/");
    assert_eq!(cfg.paytr_timeout, Duration::from_secs(30));
    assert!(!cfg.kafka_brokers.is_empty());
}

#[test]
fn test_grouped_views_mirror_flat_keys() {
    let cfg = AppConfig::load().unwrap();

    let shop = cfg.shop();
    assert_eq!(shop.tax_rate, cfg.shop_tax_rate);
    assert_eq!(shop.order_prefix, cfg.shop_order_prefix);

    let paytr = cfg.paytr();
    assert_eq!(paytr.frontend_url, cfg.frontend_url);
    assert_eq!(paytr.test_mode, cfg.paytr_test_mode);
}

#[test]
fn test_shop_settings_defaults() {
    let shop = ShopSettings::default();
    assert_eq!(shop.free_shipping_threshold, 50_000);
    assert_eq!(shop.default_shipping_cost, 2_990);
    assert_eq!(shop.currency, "TRY");
}
