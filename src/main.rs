// xmlenc - W3C XML Encryption processor
//
// Encrypts binary data, XML elements, element content, or URI-referenced
// resources into EncryptedData templates, and decrypts them back.

use std::process;

use xmlenc::app::App;

/// Entry point for the xmlenc tool.
///
/// # Exit Codes
/// * 0 - Success
/// * 1 - Error (message printed to stderr)
fn main() {
    if let Err(e) = App::init().and_then(App::execute) {
        eprintln!("Error: {e:?}");
        process::exit(1);
    }
}
