use p256::ecdsa::SigningKey;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;

fn main() {
    println!("Generating P-256 ECDSA keypair for authenticated SMS signing...\n");

    let signing_key = SigningKey::random(&mut OsRng);
    let verifying_key = signing_key.verifying_key();

    let private_key_hex = hex::encode(signing_key.to_bytes());
    let public_key_hex = hex::encode(verifying_key.to_encoded_point(false).as_bytes());

    println!("=== P-256 Keypair Generated ===\n");
    println!("Private Key (keep secret!):");
    println!("{}\n", private_key_hex);
    println!("Public Key (distribute to verifying clients):");
    println!("{}\n", public_key_hex);

    println!("=== .env Configuration ===\n");
    println!("# Add this to your .env file:");
    println!("SMS_SIGNING_KEY={}", private_key_hex);
    println!("SMS_SIGNING_KEY_ID=<pick a short identifier and set it on the realm>");
    println!("\n=== Security Notice ===");
    println!("- Keep SMS_SIGNING_KEY secret, never commit it to version control");
    println!("- Rotate by generating a new key and updating sms_sign_key_id on the realm");
}
