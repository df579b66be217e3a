// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// https://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// https://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use hickory_proto::op::{Edns, Message};
use hickory_proto::rr::rdata::opt::EdnsOption;
use hickory_proto::error::ProtoError;

/// EDNS(0) option code for padding ([RFC 7830](https://www.rfc-editor.org/rfc/rfc7830) section 3).
/// hickory-proto doesn't model this option natively, so it's carried as
/// `EdnsOption::Unknown`.
const PADDING_OPTION_CODE: u16 = 12;

/// Block size DoH queries are padded to, following [RFC
/// 8467](https://www.rfc-editor.org/rfc/rfc8467)'s recommendation for
/// padding queries sent over TLS.
pub const DEFAULT_BLOCK_SIZE: usize = 128;

/// Pad `query`'s EDNS(0) OPT record so its serialized wire length is a
/// multiple of `block_size`, hiding the exact query length from an observer
/// of the encrypted transport. Adds an EDNS pseudo-record if `query` doesn't
/// already carry one. A `block_size` of zero disables padding.
pub fn pad_query(query: &mut Message, block_size: usize) -> Result<(), ProtoError> {
    if block_size == 0 {
        return Ok(());
    }

    // Measure with a zero-length padding option already present so the OPT
    // record's fixed type/length overhead is accounted for before we decide
    // how much padding data to add.
    let mut probe = query.clone();
    set_padding(&mut probe, 0);
    let base_len = probe.to_vec()?.len();

    let remainder = base_len % block_size;
    let pad_len = if remainder == 0 { 0 } else { block_size - remainder };

    set_padding(query, pad_len);
    Ok(())
}

fn set_padding(message: &mut Message, pad_len: usize) {
    let edns = message.extensions_mut().get_or_insert_with(Edns::default);
    edns.options_mut()
        .insert(EdnsOption::Unknown(PADDING_OPTION_CODE, vec![0u8; pad_len]));
}
