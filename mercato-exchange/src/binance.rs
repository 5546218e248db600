use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use mercato_core::plugin::Credentials;
use mercato_core::{PluginError, StreamHandle, jittered_ms};
use mercato_types::{
    Balance, InstrumentLimits, InstrumentTradingDetails, OhlcvBar, Order, OrderBook, Position,
    Precision, Ticker, Timeframe, Trade,
};

use crate::http::{Method, RestClient, as_f64, parse_levels};
use crate::sign::hmac_sha256_hex;

pub(crate) const REST_BASE: &str = "https://api.binance.com";
pub(crate) const TESTNET_REST_BASE: &str = "https://testnet.binance.vision";
pub(crate) const WS_BASE: &str = "wss://stream.binance.com:9443/ws";

/// Interval strings the venue serves natively; everything else is resampled
/// upstream.
pub(crate) const NATIVE_TIMEFRAMES: &[&str] = &[
    "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w", "1M",
];

const WS_RECONNECT_BASE_MS: u64 = 1_000;

pub(crate) struct BinanceAdapter {
    rest: RestClient,
    rest_base: String,
    ws_base: String,
    credentials: Option<Credentials>,
    provider: String,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// `BTC/USDT` -> `BTCUSDT`.
fn venue_symbol(display: &str) -> String {
    display.replace(['/', '-'], "").to_uppercase()
}

impl BinanceAdapter {
    pub(crate) fn new(
        provider: &str,
        credentials: Option<Credentials>,
        is_testnet: bool,
        request_timeout: Duration,
        rest_base_override: Option<&str>,
        ws_base_override: Option<&str>,
    ) -> Result<Self, PluginError> {
        let rest_base = rest_base_override
            .map(str::to_string)
            .unwrap_or_else(|| {
                if is_testnet {
                    TESTNET_REST_BASE.to_string()
                } else {
                    REST_BASE.to_string()
                }
            });
        Ok(Self {
            rest: RestClient::new(provider, request_timeout)?,
            rest_base,
            ws_base: ws_base_override.map_or_else(|| WS_BASE.to_string(), str::to_string),
            credentials,
            provider: provider.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.rest_base)
    }

    async fn signed(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> Result<Value, PluginError> {
        let creds = self.credentials.as_ref().ok_or_else(|| {
            PluginError::auth(&self.provider, "credentials required for this endpoint")
        })?;
        params.push(("timestamp", now_ms().to_string()));
        params.push(("recvWindow", "5000".to_string()));
        let payload = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        params.push(("signature", hmac_sha256_hex(&creds.api_secret, &payload)));
        self.rest
            .send(
                method,
                &self.url(path),
                &params,
                &[("X-MBX-APIKEY", creds.api_key.as_str())],
            )
            .await
    }

    pub(crate) async fn get_symbols(&self, _market: &str) -> Result<Vec<String>, PluginError> {
        let info = self.rest.get_json(&self.url("/api/v3/exchangeInfo"), &[]).await?;
        let symbols = info["symbols"].as_array().cloned().unwrap_or_default();
        Ok(symbols
            .iter()
            .filter(|s| s["status"].as_str() == Some("TRADING"))
            .filter_map(|s| {
                Some(format!(
                    "{}/{}",
                    s["baseAsset"].as_str()?,
                    s["quoteAsset"].as_str()?
                ))
            })
            .collect())
    }

    pub(crate) async fn fetch_historical_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since_ms: Option<i64>,
        limit: Option<usize>,
        until_ms: Option<i64>,
    ) -> Result<Vec<OhlcvBar>, PluginError> {
        let mut query: Vec<(&str, String)> = vec![
            ("symbol", venue_symbol(symbol)),
            ("interval", timeframe.to_string()),
        ];
        if let Some(since) = since_ms {
            query.push(("startTime", since.to_string()));
        }
        if let Some(until) = until_ms {
            // The venue bound is inclusive; ours is exclusive.
            query.push(("endTime", (until - 1).to_string()));
        }
        if let Some(limit) = limit {
            query.push(("limit", limit.min(1_000).to_string()));
        }
        let rows = self.rest.get_json(&self.url("/api/v3/klines"), &query).await?;
        let rows = rows.as_array().cloned().unwrap_or_default();
        let mut bars: Vec<OhlcvBar> = rows.iter().filter_map(parse_kline_row).collect();
        bars.sort_by_key(|b| b.timestamp_ms);
        Ok(bars)
    }

    pub(crate) async fn fetch_latest_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<OhlcvBar>, PluginError> {
        let query: Vec<(&str, String)> = vec![
            ("symbol", venue_symbol(symbol)),
            ("interval", timeframe.to_string()),
            ("limit", "2".to_string()),
        ];
        let rows = self.rest.get_json(&self.url("/api/v3/klines"), &query).await?;
        let rows = rows.as_array().cloned().unwrap_or_default();
        let bars: Vec<OhlcvBar> = rows.iter().filter_map(parse_kline_row).collect();
        // With two rows the last one is still forming; report the closed one.
        Ok(match bars.len() {
            0 => None,
            1 => Some(bars[0]),
            n => Some(bars[n - 2]),
        })
    }

    pub(crate) async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker, PluginError> {
        let query = vec![("symbol", venue_symbol(symbol))];
        let raw = self
            .rest
            .get_json(&self.url("/api/v3/ticker/24hr"), &query)
            .await?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            timestamp_ms: raw["closeTime"].as_i64(),
            bid: as_f64(&raw["bidPrice"]),
            ask: as_f64(&raw["askPrice"]),
            last: as_f64(&raw["lastPrice"]),
            high: as_f64(&raw["highPrice"]),
            low: as_f64(&raw["lowPrice"]),
            base_volume: as_f64(&raw["volume"]),
        })
    }

    pub(crate) async fn fetch_order_book(
        &self,
        symbol: &str,
        depth: Option<usize>,
    ) -> Result<OrderBook, PluginError> {
        let query = vec![
            ("symbol", venue_symbol(symbol)),
            ("limit", depth.unwrap_or(20).min(5_000).to_string()),
        ];
        let raw = self.rest.get_json(&self.url("/api/v3/depth"), &query).await?;
        Ok(OrderBook {
            symbol: symbol.to_string(),
            timestamp_ms: None,
            bids: parse_levels(raw.get("bids")),
            asks: parse_levels(raw.get("asks")),
            nonce: raw["lastUpdateId"].as_u64(),
        })
    }

    pub(crate) async fn fetch_open_orders(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<Order>, PluginError> {
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(symbol) = symbol {
            params.push(("symbol", venue_symbol(symbol)));
        }
        let raw = self.signed(Method::Get, "/api/v3/openOrders", params).await?;
        let rows = raw.as_array().cloned().unwrap_or_default();
        Ok(rows
            .iter()
            .filter_map(|row| parse_order(row, symbol))
            .collect())
    }

    pub(crate) async fn place_order(
        &self,
        symbol: &str,
        order_type: &str,
        side: &str,
        amount: f64,
        price: Option<f64>,
    ) -> Result<Order, PluginError> {
        let mut params: Vec<(&str, String)> = vec![
            ("symbol", venue_symbol(symbol)),
            ("side", side.to_uppercase()),
            ("type", order_type.to_uppercase()),
            ("quantity", amount.to_string()),
        ];
        if order_type.eq_ignore_ascii_case("limit") {
            let price = price.ok_or_else(|| {
                PluginError::venue(&self.provider, "limit orders require a price")
            })?;
            params.push(("price", price.to_string()));
            params.push(("timeInForce", "GTC".to_string()));
        }
        let raw = self.signed(Method::Post, "/api/v3/order", params).await?;
        parse_order(&raw, Some(symbol)).ok_or_else(|| {
            PluginError::venue(&self.provider, "unparseable order placement response")
        })
    }

    pub(crate) async fn cancel_order(
        &self,
        order_id: &str,
        symbol: Option<&str>,
    ) -> Result<(), PluginError> {
        let symbol = symbol.ok_or_else(|| {
            PluginError::venue(&self.provider, "cancel requires the order's symbol")
        })?;
        let params: Vec<(&str, String)> = vec![
            ("symbol", venue_symbol(symbol)),
            ("orderId", order_id.to_string()),
        ];
        self.signed(Method::Delete, "/api/v3/order", params).await?;
        Ok(())
    }

    pub(crate) async fn get_account_balance(
        &self,
    ) -> Result<HashMap<String, Balance>, PluginError> {
        let raw = self.signed(Method::Get, "/api/v3/account", Vec::new()).await?;
        let mut balances = HashMap::new();
        for entry in raw["balances"].as_array().into_iter().flatten() {
            let Some(asset) = entry["asset"].as_str() else {
                continue;
            };
            let free = as_f64(&entry["free"]).unwrap_or(0.0);
            let used = as_f64(&entry["locked"]).unwrap_or(0.0);
            if free == 0.0 && used == 0.0 {
                continue;
            }
            balances.insert(
                asset.to_string(),
                Balance {
                    free,
                    used,
                    total: free + used,
                },
            );
        }
        Ok(balances)
    }

    pub(crate) async fn get_open_positions(
        &self,
        _symbols: Option<&[String]>,
    ) -> Result<Vec<Position>, PluginError> {
        // Spot account: no positions to report.
        Ok(Vec::new())
    }

    pub(crate) async fn instrument_trading_details(
        &self,
        symbol: &str,
    ) -> Result<InstrumentTradingDetails, PluginError> {
        let query = vec![("symbol", venue_symbol(symbol))];
        let info = self
            .rest
            .get_json(&self.url("/api/v3/exchangeInfo"), &query)
            .await?;
        let entry = info["symbols"]
            .as_array()
            .and_then(|s| s.first())
            .ok_or_else(|| {
                PluginError::venue(&self.provider, format!("unknown instrument: {symbol}"))
            })?;

        let mut limits = InstrumentLimits::default();
        for filter in entry["filters"].as_array().into_iter().flatten() {
            match filter["filterType"].as_str() {
                Some("LOT_SIZE") => {
                    limits.min_amount = as_f64(&filter["minQty"]);
                    limits.max_amount = as_f64(&filter["maxQty"]);
                }
                Some("NOTIONAL" | "MIN_NOTIONAL") => {
                    limits.min_cost = as_f64(&filter["minNotional"]);
                }
                _ => {}
            }
        }
        Ok(InstrumentTradingDetails {
            symbol: symbol.to_string(),
            market_type: "spot".into(),
            base: entry["baseAsset"].as_str().map(str::to_string),
            quote: entry["quoteAsset"].as_str().map(str::to_string),
            is_active: entry["status"].as_str().map(|s| s == "TRADING"),
            precision: Precision {
                price: entry["quotePrecision"].as_u64().and_then(|v| v.try_into().ok()),
                amount: entry["baseAssetPrecision"]
                    .as_u64()
                    .and_then(|v| v.try_into().ok()),
            },
            limits,
        })
    }

    pub(crate) fn stream_ohlcv(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> (StreamHandle, mpsc::Receiver<OhlcvBar>) {
        let stream = format!(
            "{}@kline_{timeframe}",
            venue_symbol(symbol).to_lowercase()
        );
        self.spawn_ws(stream, |raw| {
            let k = raw.get("k")?;
            Some(OhlcvBar {
                timestamp_ms: k["t"].as_i64()?,
                open: as_f64(&k["o"])?,
                high: as_f64(&k["h"])?,
                low: as_f64(&k["l"])?,
                close: as_f64(&k["c"])?,
                volume: as_f64(&k["v"])?,
            })
        })
    }

    pub(crate) fn stream_trades(&self, symbol: &str) -> (StreamHandle, mpsc::Receiver<Trade>) {
        let display = symbol.to_string();
        let stream = format!("{}@trade", venue_symbol(symbol).to_lowercase());
        self.spawn_ws(stream, move |raw| {
            if raw.get("e")?.as_str()? != "trade" {
                return None;
            }
            Some(Trade {
                id: raw["t"].as_i64().map(|id| id.to_string()),
                timestamp_ms: raw["T"].as_i64()?,
                symbol: display.clone(),
                // `m` marks the buyer as maker, i.e. a sell-side taker.
                side: if raw["m"].as_bool().unwrap_or(false) {
                    "sell".into()
                } else {
                    "buy".into()
                },
                price: as_f64(&raw["p"])?,
                amount: as_f64(&raw["q"])?,
            })
        })
    }

    pub(crate) fn stream_order_book(
        &self,
        symbol: &str,
    ) -> (StreamHandle, mpsc::Receiver<OrderBook>) {
        let display = symbol.to_string();
        let stream = format!("{}@depth20@100ms", venue_symbol(symbol).to_lowercase());
        self.spawn_ws(stream, move |raw| {
            let bids = parse_levels(raw.get("bids"));
            let asks = parse_levels(raw.get("asks"));
            if bids.is_empty() && asks.is_empty() {
                return None;
            }
            Some(OrderBook {
                symbol: display.clone(),
                timestamp_ms: None,
                bids,
                asks,
                nonce: raw["lastUpdateId"].as_u64(),
            })
        })
    }

    /// Connect a single-stream socket and pump parsed updates into a channel
    /// until stopped. Reconnects with jittered backoff on session loss.
    fn spawn_ws<T, F>(&self, stream: String, parse: F) -> (StreamHandle, mpsc::Receiver<T>)
    where
        T: Send + 'static,
        F: Fn(&Value) -> Option<T> + Send + 'static,
    {
        let url = format!("{}/{stream}", self.ws_base);
        let provider = self.provider.clone();
        let (tx, rx) = mpsc::channel(256);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let join = tokio::spawn(async move {
            loop {
                let mut session = match connect_async(url.as_str()).await {
                    Ok((ws, _resp)) => ws,
                    Err(err) => {
                        tracing::warn!(%provider, %url, error = %err, "stream connect failed");
                        tokio::select! {
                            _ = &mut stop_rx => return,
                            () = tokio::time::sleep(Duration::from_millis(jittered_ms(WS_RECONNECT_BASE_MS, 20))) => continue,
                        }
                    }
                };
                tracing::debug!(%provider, %url, "stream session established");

                loop {
                    tokio::select! {
                        _ = &mut stop_rx => {
                            let _ = session.close(None).await;
                            return;
                        }
                        frame = session.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                let Ok(raw) = serde_json::from_str::<Value>(text.as_str()) else {
                                    continue;
                                };
                                if let Some(update) = parse(&raw)
                                    && tx.send(update).await.is_err()
                                {
                                    // Downstream gone; shut the session.
                                    let _ = session.close(None).await;
                                    return;
                                }
                            }
                            Some(Ok(Message::Ping(payload))) => {
                                let _ = session.send(Message::Pong(payload)).await;
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                tracing::warn!(%provider, error = %err, "stream read failed");
                                break;
                            }
                        }
                    }
                }

                tokio::select! {
                    _ = &mut stop_rx => return,
                    () = tokio::time::sleep(Duration::from_millis(jittered_ms(WS_RECONNECT_BASE_MS, 20))) => {}
                }
            }
        });
        (StreamHandle::new(join, stop_tx), rx)
    }
}

fn parse_kline_row(row: &Value) -> Option<OhlcvBar> {
    let cols = row.as_array()?;
    Some(OhlcvBar {
        timestamp_ms: cols.first()?.as_i64()?,
        open: as_f64(cols.get(1)?)?,
        high: as_f64(cols.get(2)?)?,
        low: as_f64(cols.get(3)?)?,
        close: as_f64(cols.get(4)?)?,
        volume: as_f64(cols.get(5)?)?,
    })
}

fn parse_order(raw: &Value, display_symbol: Option<&str>) -> Option<Order> {
    let amount = as_f64(&raw["origQty"]).unwrap_or(0.0);
    let filled = as_f64(&raw["executedQty"]).unwrap_or(0.0);
    Some(Order {
        id: match &raw["orderId"] {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            _ => return None,
        },
        client_order_id: raw["clientOrderId"].as_str().map(str::to_string),
        timestamp_ms: raw["time"]
            .as_i64()
            .or_else(|| raw["transactTime"].as_i64())
            .unwrap_or(0),
        symbol: display_symbol.map_or_else(
            || raw["symbol"].as_str().unwrap_or_default().to_string(),
            str::to_string,
        ),
        order_type: raw["type"].as_str().unwrap_or("limit").to_lowercase(),
        side: raw["side"].as_str().unwrap_or_default().to_lowercase(),
        price: as_f64(&raw["price"]).filter(|p| *p > 0.0),
        average: None,
        amount,
        filled,
        remaining: (amount - filled).max(0.0),
        status: raw["status"].as_str().unwrap_or("open").to_lowercase(),
    })
}
