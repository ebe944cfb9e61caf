//! # ACME DNS-01 憑證簽發庫
//!
//! 本庫透過 ACME 協議（例如 Let's Encrypt）申請 TLS 憑證，域名控制權
//! 一律以 DNS-01 挑戰證明：對區域的權威伺服器送出 TSIG 簽署的動態
//! 更新安裝 `_acme-challenge` TXT 記錄，等記錄在遞迴解析器上可見後
//! 通知 CA 驗證，最後下載簽好的憑證鏈。
//!
//! ## 模組總覽
//!
//! - **session / nonce / protection / jws / signature**：JWS 簽名請求
//!   通道。session 獨佔 nonce 狀態，每次交換消耗一個、補回一個。
//! - **account**：帳戶註冊與聯絡資訊的比對更新。
//! - **csr**：從憑證簽署請求萃取待驗證域名。
//! - **order / challenge**：訂單狀態機與 DNS-01 挑戰材料。
//! - **resolver / dns_update**：權威伺服器探索、TSIG 動態更新與
//!   挑戰記錄的自我檢查。
//! - **poll**：CA 端非同步狀態的輪詢原語。
//! - **config**：操作者設定檔。
//!
//! ## 流程
//!
//! ```text
//! 載入帳戶金鑰與 CSR（檢查兩者金鑰不同）
//!   → 取得 CA 目錄、註冊帳戶
//!   → 建立訂單
//!   → 逐一處理授權：
//!       安裝 TXT 記錄 → 等待可見 → 通知 CA → 輪詢至 valid
//!       （結束時無論成敗都移除記錄）
//!   → 提交 CSR 最終化訂單 → 輪詢至簽發完成 → 下載 PEM 憑證鏈
//! ```
//!
//! 執行嚴格循序，所有 I/O 皆為同步阻塞；唯一的共享可變狀態是
//! session 內的 nonce。

pub mod account;
pub mod base64;
pub mod challenge;
pub mod config;
pub mod csr;
pub mod directory;
pub mod dns_update;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod nonce;
pub mod order;
pub mod payload;
pub mod poll;
pub mod protection;
pub mod resolver;
pub mod session;
pub mod signature;
