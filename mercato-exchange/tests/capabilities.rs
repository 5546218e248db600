use mercato_core::plugin::{InstanceSpec, PluginFactory};
use mercato_core::PluginError;
use mercato_exchange::ExchangeFactory;
use mercato_types::{Features, StreamKind};

#[test]
fn factory_lists_both_venues() {
    assert_eq!(ExchangeFactory.plugin_key(), "exchange");
    assert_eq!(ExchangeFactory.supported_markets(), &["crypto"]);
    assert_eq!(
        ExchangeFactory.configurable_providers(),
        vec!["binance".to_string(), "kraken".to_string()]
    );
}

#[test]
fn binance_advertises_native_streams() {
    let plugin = ExchangeFactory.build(&InstanceSpec::new("binance")).unwrap();
    let features = plugin.features();
    assert!(features.can_stream(StreamKind::Ohlcv));
    assert!(features.can_stream(StreamKind::Trades));
    assert!(features.can_stream(StreamKind::OrderBook));
    assert!(!features.can_stream(StreamKind::UserOrders));
    assert!(features.can_poll(StreamKind::UserOrders));
    assert!(features.contains(Features::TRADING));
    assert!(plugin.as_ohlcv_stream_provider().is_some());
    assert!(plugin.as_user_order_stream_provider().is_none());
}

#[test]
fn kraken_is_rest_only() {
    let plugin = ExchangeFactory.build(&InstanceSpec::new("kraken")).unwrap();
    let features = plugin.features();
    assert!(!features.can_stream(StreamKind::Ohlcv));
    assert!(!features.can_stream(StreamKind::Trades));
    // Polling fallbacks stay available.
    assert!(features.can_poll(StreamKind::Ohlcv));
    assert!(features.can_poll(StreamKind::Trades));
    assert!(features.can_poll(StreamKind::OrderBook));
    assert!(!features.can_poll(StreamKind::UserOrders));
    assert!(plugin.as_ohlcv_stream_provider().is_none());
    assert!(plugin.as_trading_provider().is_none());
}

#[test]
fn unknown_providers_are_rejected() {
    let err = ExchangeFactory
        .build(&InstanceSpec::new("bitfinex"))
        .unwrap_err();
    assert!(matches!(err, PluginError::Venue { .. }), "{err}");
}

#[test]
fn native_timeframes_match_each_venue() {
    let binance = ExchangeFactory.build(&InstanceSpec::new("binance")).unwrap();
    assert!(binance.supported_timeframes().unwrap().contains(&"1M"));
    let kraken = ExchangeFactory.build(&InstanceSpec::new("kraken")).unwrap();
    let tfs = kraken.supported_timeframes().unwrap();
    assert!(tfs.contains(&"1m"));
    assert!(!tfs.contains(&"1M"));
}
