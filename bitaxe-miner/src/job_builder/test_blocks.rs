//! Known-good mining data for tests.
//!
//! Hex strings are kept in the form the pool or the chip puts them on the
//! wire, so the tests exercise the same parsing the daemon does.

use std::sync::LazyLock;

use serde_json::{Value, json};

fn branches(hex: &[&str]) -> Vec<Value> {
    hex.iter().map(|h| Value::String(h.to_string())).collect()
}

/// Block 881,423, solved by the 256 Foundation's "Telehash" pool on
/// January 30, 2025.
///
/// The pool shipped the coinbase in legacy (non-witness) form, which is what
/// the merkle tree commits to.
pub mod block_881423 {
    use super::*;
    use bitcoin::BlockHash;
    use std::str::FromStr;

    pub const PREV_HASH_STRATUM: &str =
        "8a6ac9e3fe15ca70f8995e21434cb64ac4d2b5e10001543b0000000000000000";
    pub const COINBASE1: &str = "01000000010000000000000000000000000000000000000000000000000000\
                                 000000000000ffffffff3d030f730d000469c19a67";
    pub const EXTRANONCE1: &str = "04830cee";
    /// `220cf1ad` on the wire, i.e. a little-endian counter.
    pub const EXTRANONCE2_COUNTER: u32 = 0xadf10c22;
    pub const COINBASE2: &str = "9a67b6600000000000000a41706f6c6c6f192f6d696e65642062792032353620\
                                 466f756e646174696f6e2fffffffff0275aac01200000000160014c64b1b92\
                                 83ba1ea86bb9e7b696b0c8f68dad04000000000000000000266a24aa21a9ed\
                                 b395560ab72068c2afb1d7e6c7db26b813482089d2c4d2471b9036c5e82614\
                                 0600000000";
    pub const MERKLE_BRANCHES: &[&str] = &[
        "4282357ab0a2f4e8e562c8c5eae1d63b559068f9072374b72e26b88ac841908f",
        "c2bbae90d06f8025ade3516ca2e42d79318b6e56fccb9609df85a654a8341068",
        "cbb30084acbcb5ce6d5436e853bc612466df0c00702be6f51d47072f1a5d0480",
        "bb092e533f70b79246fc9e4bdc9b81ac8332e56f2651e3b237a150d6d807b081",
        "0d32959988733447cb340326a1fe4d3c2cff5d636e32a4e08c3fc5a234f6f6bc",
        "8ba3477940924a90067cff3dd30bc46916cf4c2f73fb6229b8f8197b83b6ddb9",
        "3fe97cc5dec1cddd66c9d3780888c145c12418590cd983c4871b1bf03fabbf9e",
        "bd1c6a3bcd0ebaa0eca54d9c802540f312c7705435601d776b4f59bb52cff67d",
        "8638c10190b8f4f558bafdbb57f46226c349a83f229f431143ae75e425fb5cbd",
        "6d6f4eae41cccb21a7c97ac496d9f89b8a4f772389b76f7691519dda38264221",
        "82dad7a1e2613af0e61f77f03d6208c83e72f917dade4235cc35e37ee3ad6e3f",
    ];
    pub const VERSION: u32 = 0x2e596000;
    pub const NBITS: u32 = 0x17029a8a;
    pub const NTIME: u32 = 0x679ac169;
    pub const NONCE: u32 = 0xff05fb02;

    /// Merkle root in hash (internal) byte order.
    pub const MERKLE_ROOT: &str =
        "76f63a35f1b8b5016d3eb0cce2eebbdf58bf8fbea4e870c8f770346bdfcf622d";

    pub static BLOCK_HASH: LazyLock<BlockHash> = LazyLock::new(|| {
        BlockHash::from_str("0000000000000000000269d52c24ea451225613aab095d90d771d4e29aa96cdd")
            .unwrap()
    });

    /// `mining.notify` params as the pool would have sent them.
    pub fn notify_params() -> Vec<Value> {
        vec![
            json!("1e3"),
            json!(PREV_HASH_STRATUM),
            json!(COINBASE1),
            json!(COINBASE2),
            Value::Array(branches(MERKLE_BRANCHES)),
            json!(format!("{:08x}", VERSION)),
            json!(format!("{:08x}", NBITS)),
            json!(format!("{:08x}", NTIME)),
            json!(true),
        ]
    }
}

/// A job and share captured between esp-miner and public-pool.io.
pub mod esp_miner_capture {
    use super::*;

    pub const NOTIFY: &str = r#"{"id":null,"method":"mining.notify","params":["875b4b7","6b6455fd6db962c101f2d4fc0d67f4a3bc96391d000152960000000000000000","02000000010000000000000000000000000000000000000000000000000000000000000000ffffffff170330c30d5075626c69632d506f6f6c","ffffffff02e5b5c61200000000220020984a77c289084ff2d434c316bdada021c6c183d507c8a20d3b159b09ac02fe280000000000000000266a24aa21a9edb98ee50410ed4abd48401ed484fc874409d086a3faf0816136a8ad6168314c5800000000",["21af451ddb51e887ff1feb5592b87290098565035eb8500031aedcc776d4e72a","c5af269519c809a9546d5a58ca6445d3dbb80cb7045448ecc48309af034da8f8","fb9f8f9959f6bb0ceb63fa53aed1d5a615c6b6d3f50a468ea89a45a1234bda74","a4f4fee8e5fc19ca8d93e67b9236c37ddb864982010434745c0abfe9b914980c","33092206642744fbe5499c3e621cd5c6b52733e54fbebd869f070082b807f740","3b857e32c5cff4864efab967b9a456ca03b2167ab96bd9076ce294c8a67a7fe2","881a07cd881d0c3e590b4b090ea8d58e1439dc56c63686f7de23c47045441e30","315e4dbcc8e7b1c9d594a73978268791880dddb2c26eec8e75768668dad99d80","69952b77c632be16b1ac7ac7048f13d4e962b2e215d79a343f01e6e281d7c304","fc63eb4392c4d6c6d689788875fca35143fdcd4f4a82e8698e0e441751a70b4a","09e419bbe20aa3a7640f1b91f50599ceddff899e90d3f18951ad5418c4850a6b","004978aa346b4f1880bcadb3ca3792d771ee6aeca427f61e74baba44b75cfb88"],"20000000","17023a04","685468d7",false]}"#;

    pub const EXTRANONCE1: &str = "4128064f";
    pub const EXTRANONCE2_COUNTER: u32 = 0x17;
    pub const EXTRANONCE2_LEN: usize = 4;
    pub const VERSION_MASK: u32 = 0x1fffe000;
    pub const POOL_DIFFICULTY: f64 = 8192.0;

    /// Merkle root in hash (internal) byte order.
    pub const MERKLE_ROOT: &str =
        "06ddf5f08c36414b95ea54db71a0c28761a98bcf6355919e044f88725519a7cb";

    /// The job as transmitted to a BM1366 with job id 0x68.
    pub const JOB_FRAME: &str = concat!(
        "55aa2156680100000000043a0217d7685468",
        "5519a7cb044f88726355919e61a98bcf71a0c28795ea54db8c36414b06ddf5f0",
        "0000000000000000965201001d3996bca3f4670dfcd4f201c162b96dfd55646b",
        "00000020721c",
    );

    /// Midstates for the base version and the next three rolled versions.
    pub const MIDSTATES: [&str; 4] = [
        "71709ddf47fc1c9388a959c3c3dfbffa21f530caf813f395cf8109fdc6916e7d",
        "ee5b8310b21dcde630474666eab394e4afcfb29c461d707a934c2bbd3b3ea558",
        "b5ae65f5965a5dbf0c026a61966fe7eafd82224205ddf5cf970e2c932a90e9a9",
        "61f3dcd80a111b67e588eedcbcb00547c859282ab2731400150381ca48fc2ba3",
    ];

    /// Chip response carrying the share, as seen from a BM1370 (job byte 0xd2).
    pub const RESULT_FRAME: [u8; 11] = [
        0xaa, 0x55, 0x4c, 0x03, 0x52, 0x75, 0x0c, 0xd2, 0x05, 0xa2, 0x9c,
    ];
    pub const ROLLED_VERSION: u32 = 0x20b44000;
    pub const NONCE: u32 = 0x7552034c;
    pub const SHARE_DIFFICULTY: f64 = 29588.014;

    /// The `mining.submit` params the share produced.
    pub const SUBMIT_PARAMS: &str =
        r#"["bc1q...bitaxe","875b4b7","17000000","685468d7","7552034c","00b44000"]"#;

    pub fn notify_params() -> Vec<Value> {
        let message: Value = serde_json::from_str(NOTIFY).unwrap();
        message["params"].as_array().cloned().unwrap()
    }
}
