//! Plain-text rendering of the board and the inventory.

use std::fmt::Write;

use rxdesk_store::{Conversation, Product};
use rxdesk_sync::Board;

fn conversation_line(out: &mut String, conversation: &Conversation) {
    let marker = if conversation.is_new { '*' } else { ' ' };
    let assignee = conversation
        .assigned_to
        .as_ref()
        .map_or("-", |agent| agent.as_str());
    let _ = writeln!(
        out,
        "  {marker} {:<10} {:<24} {:<16} {:<12} {}",
        conversation.id,
        conversation.customer_name,
        conversation.last_message_time.format("%Y-%m-%d %H:%M").to_string(),
        assignee,
        conversation.last_message,
    );
}

/// Render the board, one section per column.
pub fn board(board: &Board) -> String {
    let mut out = String::new();
    for column in board.columns() {
        let _ = writeln!(
            out,
            "{} ({})",
            column.status.as_str().to_uppercase(),
            column.count()
        );
        for conversation in &column.conversations {
            conversation_line(&mut out, conversation);
        }
    }
    if !board.new_arrivals().is_empty() {
        let _ = writeln!(out, "{} new conversation(s)", board.new_arrivals().len());
    }
    out
}

/// Render a product table.
pub fn products(products: &[&Product]) -> String {
    let mut out = String::new();
    for product in products {
        let flag = if product.is_low_stock() { "LOW" } else { "" };
        let _ = writeln!(
            out,
            "{:<10} {:<28} {:<14} {:>8.2} {:>6} {}",
            product.id, product.name, product.category, product.price, product.stock_quantity, flag
        );
    }
    out
}
