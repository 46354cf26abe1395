//! Secure-side operation engines.
//!
//! An [`Executor`] is what the simulated partition runs when an operation
//! message reaches the "hardware". The family engines here produce outputs of
//! the right shape and length and keep segmented-operation state per handle,
//! but they are stand-ins: the transforms are deterministic byte mixing, not
//! cryptography.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use nsbridge_core::Family;
use nsbridge_drivers::{
    AesCcm, AesCtr, AesEcb, CryptoKey, Ecdh, Sha2, Trng,
    aesccm::{
        AesCcmMsg, AesCcmOneStep, AesCcmOperation, MAC_LENGTHS, NONCE_LENGTHS, STATUS_MAC_INVALID,
    },
    aesctr::{AesCtrMsg, AesCtrOperation, COUNTER_LEN, STATUS_UNSUPPORTED_KEY},
    aesecb::{AesEcbMsg, BLOCK_LEN},
    ecdh::{
        ComputeSharedSecret, Curve, EcdhOperation, EcdhParams, GeneratePublicKey,
        STATUS_POINT_AT_INFINITY, STATUS_PRIVATE_KEY_LARGER_THAN_ORDER,
    },
    key::AES_KEY_LENGTHS,
    sha2::{HashType, Sha2Msg, Sha2Operation, Sha2Params},
    trng::{TrngOperation, STATUS_ENTROPY_FAILURE},
};
use nsbridge_proto::{HandleId, Status};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Runs operations on behalf of the simulated secure partition.
pub trait Executor<F: Family>: Send + Sync + 'static {
    /// A handle was opened with `params`.
    fn open(&self, _handle: HandleId, _params: &F::Params) {}

    /// Run `operation`, updating it in place, and return the driver status.
    fn execute(&self, handle: HandleId, msg_type: F::MsgType, operation: &mut F::Operation)
    -> Status;

    /// Segmented-operation state of `handle` was discarded.
    fn reset(&self, _handle: HandleId) {}

    /// `handle` was closed.
    fn close(&self, _handle: HandleId) {}
}

/// Completes every operation successfully without touching it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Succeed;

impl<F: Family> Executor<F> for Succeed {
    fn execute(&self, _: HandleId, _: F::MsgType, _: &mut F::Operation) -> Status {
        Status::SUCCESS
    }
}

/// Completes every operation with a fixed status.
#[derive(Debug, Clone, Copy)]
pub struct FailWith(pub Status);

impl<F: Family> Executor<F> for FailWith {
    fn execute(&self, _: HandleId, _: F::MsgType, _: &mut F::Operation) -> Status {
        self.0
    }
}

/// Executor from a closure over the message type and operation.
pub struct ExecFn<T>(pub T);

impl<F, T> Executor<F> for ExecFn<T>
where
    F: Family,
    T: Fn(F::MsgType, &mut F::Operation) -> Status + Send + Sync + 'static,
{
    fn execute(&self, _: HandleId, msg_type: F::MsgType, operation: &mut F::Operation) -> Status {
        (self.0)(msg_type, operation)
    }
}

/// Deterministic byte mixer standing in for hardware transforms.
///
/// FNV-1a over `input`, then expanded to `len` bytes.
pub fn mix(input: &[u8], len: usize) -> Vec<u8> {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut state = input.iter().fold(OFFSET, |acc, &b| (acc ^ u64::from(b)).wrapping_mul(PRIME));
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        state = (state ^ out.len() as u64).wrapping_mul(PRIME);
        out.extend_from_slice(&state.to_le_bytes());
    }
    out.truncate(len);
    out
}

/// Key bytes the engines derive keystreams from.
fn material(key: &CryptoKey) -> Option<Vec<u8>> {
    match key {
        CryptoKey::Plaintext(bytes) if !bytes.is_empty() => Some(bytes.clone()),
        CryptoKey::KeyStore { id, len } if *len > 0 => Some(mix(&id.to_le_bytes(), *len)),
        _ => None,
    }
}

fn aes_material(key: &CryptoKey) -> Option<Vec<u8>> {
    material(key).filter(|bytes| AES_KEY_LENGTHS.contains(&bytes.len()))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    #[allow(clippy::expect_used)]
    mutex.lock().expect("engine state mutex poisoned")
}

#[derive(Debug, Clone)]
struct CtrState {
    key: Vec<u8>,
    counter: [u8; COUNTER_LEN],
    offset: usize,
}

impl CtrState {
    fn keystream_byte(&self, position: usize) -> u8 {
        let block = (position / COUNTER_LEN) as u8;
        self.key[position % self.key.len()] ^ self.counter[position % COUNTER_LEN] ^ block
    }

    fn apply(&mut self, input: &[u8]) -> Vec<u8> {
        let start = self.offset;
        self.offset += input.len();
        input.iter().enumerate().map(|(i, b)| b ^ self.keystream_byte(start + i)).collect()
    }
}

/// AES-CTR engine. Encryption and decryption are the same keystream XOR, and
/// a segmented operation continues the keystream across segments.
#[derive(Debug, Default)]
pub struct AesCtrEngine {
    segmented: Mutex<HashMap<HandleId, CtrState>>,
}

impl Executor<AesCtr> for AesCtrEngine {
    fn execute(
        &self,
        handle: HandleId,
        msg_type: AesCtrMsg,
        operation: &mut AesCtrOperation,
    ) -> Status {
        use AesCtrMsg::{OneStepDecrypt, OneStepEncrypt};

        match (msg_type, operation) {
            (OneStepEncrypt | OneStepDecrypt, AesCtrOperation::OneStep(op)) => {
                let Some(key) = aes_material(&op.key) else {
                    return STATUS_UNSUPPORTED_KEY;
                };
                let mut state = CtrState { key, counter: op.initial_counter, offset: 0 };
                op.output = state.apply(&op.input);
                Status::SUCCESS
            },
            (AesCtrMsg::SetupEncrypt | AesCtrMsg::SetupDecrypt, AesCtrOperation::Setup(setup)) => {
                let Some(key) = aes_material(&setup.key) else {
                    return STATUS_UNSUPPORTED_KEY;
                };
                let state = CtrState { key, counter: setup.initial_counter, offset: 0 };
                lock(&self.segmented).insert(handle, state);
                Status::SUCCESS
            },
            (AesCtrMsg::AddData | AesCtrMsg::Finalize, AesCtrOperation::Segment(segment)) => {
                let mut segmented = lock(&self.segmented);
                let Some(state) = segmented.get_mut(&handle) else {
                    return Status::ERROR;
                };
                segment.output = state.apply(&segment.input);
                if msg_type == AesCtrMsg::Finalize {
                    segmented.remove(&handle);
                }
                Status::SUCCESS
            },
            _ => Status::INVALID_INPUTS,
        }
    }

    fn reset(&self, handle: HandleId) {
        lock(&self.segmented).remove(&handle);
    }

    fn close(&self, handle: HandleId) {
        lock(&self.segmented).remove(&handle);
    }
}

/// AES-ECB engine. Each block is XORed with the key, so decryption inverts
/// encryption.
#[derive(Debug, Default)]
pub struct AesEcbEngine {
    keys: Mutex<HashMap<HandleId, Vec<u8>>>,
}

impl AesEcbEngine {
    fn transform(key: &[u8], input: &[u8]) -> Vec<u8> {
        input.iter().enumerate().map(|(i, b)| b ^ key[i % key.len()]).collect()
    }
}

impl Executor<AesEcb> for AesEcbEngine {
    fn execute(
        &self,
        handle: HandleId,
        msg_type: AesEcbMsg,
        operation: &mut nsbridge_drivers::aesecb::AesEcbOperation,
    ) -> Status {
        if operation.input.len() % BLOCK_LEN != 0 {
            return Status::INVALID_INPUTS;
        }
        match msg_type {
            AesEcbMsg::OneStepEncrypt | AesEcbMsg::OneStepDecrypt => {
                let Some(key) = aes_material(&operation.key) else {
                    return Status::INVALID_INPUTS;
                };
                operation.output = Self::transform(&key, &operation.input);
                Status::SUCCESS
            },
            AesEcbMsg::SetupEncrypt | AesEcbMsg::SetupDecrypt => {
                let Some(key) = aes_material(&operation.key) else {
                    return Status::INVALID_INPUTS;
                };
                lock(&self.keys).insert(handle, key);
                Status::SUCCESS
            },
            AesEcbMsg::AddData | AesEcbMsg::Finalize => {
                let mut keys = lock(&self.keys);
                let Some(key) = keys.get(&handle) else {
                    return Status::ERROR;
                };
                operation.output = Self::transform(key, &operation.input);
                if msg_type == AesEcbMsg::Finalize {
                    keys.remove(&handle);
                }
                Status::SUCCESS
            },
            _ => Status::INVALID_INPUTS,
        }
    }

    fn close(&self, handle: HandleId) {
        lock(&self.keys).remove(&handle);
    }
}

fn ccm_keystream(key: &[u8], nonce: &[u8], position: usize) -> u8 {
    key[position % key.len()] ^ nonce[position % nonce.len()] ^ (position / BLOCK_LEN) as u8
}

/// Tag over the key, nonce, associated data and plaintext.
fn ccm_tag(key: &[u8], nonce: &[u8], aad: &[u8], plaintext: &[u8], mac_len: usize) -> Vec<u8> {
    let aad_len = aad.len().to_le_bytes();
    let framed = [key, nonce, aad_len.as_slice(), aad, plaintext].concat();
    mix(&framed, mac_len)
}

#[derive(Debug, Clone, Default)]
struct CcmState {
    key: Vec<u8>,
    decrypt: bool,
    aad_len: usize,
    payload_len: usize,
    mac_len: usize,
    nonce: Option<Vec<u8>>,
    aad: Vec<u8>,
    plaintext: Vec<u8>,
}

impl CcmState {
    fn lengths_fit(&self) -> bool {
        self.aad.len() <= self.aad_len && self.plaintext.len() <= self.payload_len
    }

    /// Run `input` through the keystream, recording the plaintext side.
    fn apply(&mut self, nonce: &[u8], input: &[u8]) -> Vec<u8> {
        let start = self.plaintext.len();
        let output: Vec<u8> = input
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ ccm_keystream(&self.key, nonce, start + i))
            .collect();
        let plain = if self.decrypt { &output } else { input };
        self.plaintext.extend_from_slice(plain);
        output
    }
}

/// AES-CCM engine. The payload is a keystream XOR keyed by key and nonce; the
/// tag mixes key, nonce, associated data and plaintext. Segmented operations
/// enforce the declared lengths and take associated data before payload.
#[derive(Debug, Default)]
pub struct AesCcmEngine {
    segmented: Mutex<HashMap<HandleId, CcmState>>,
}

impl AesCcmEngine {
    fn one_step(msg_type: AesCcmMsg, op: &mut AesCcmOneStep) -> Status {
        let Some(key) = aes_material(&op.key) else {
            return Status::INVALID_INPUTS;
        };
        if !NONCE_LENGTHS.contains(&op.nonce.len()) {
            return Status::INVALID_INPUTS;
        }
        let output: Vec<u8> = op
            .input
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ ccm_keystream(&key, &op.nonce, i))
            .collect();

        if msg_type == AesCcmMsg::OneStepEncrypt {
            if !MAC_LENGTHS.contains(&op.mac_len) {
                return Status::INVALID_INPUTS;
            }
            op.mac = ccm_tag(&key, &op.nonce, &op.aad, &op.input, op.mac_len);
            op.output = output;
            return Status::SUCCESS;
        }

        if !MAC_LENGTHS.contains(&op.mac.len()) {
            return Status::INVALID_INPUTS;
        }
        if ccm_tag(&key, &op.nonce, &op.aad, &output, op.mac.len()) != op.mac {
            op.output.clear();
            return STATUS_MAC_INVALID;
        }
        op.output = output;
        Status::SUCCESS
    }
}

impl Executor<AesCcm> for AesCcmEngine {
    fn execute(
        &self,
        handle: HandleId,
        msg_type: AesCcmMsg,
        operation: &mut AesCcmOperation,
    ) -> Status {
        use AesCcmMsg::{
            AddAad, AddData, FinalizeDecrypt, FinalizeEncrypt, OneStepDecrypt, OneStepEncrypt,
            SetLengths, SetNonce, SetupDecrypt, SetupEncrypt,
        };

        if let (OneStepEncrypt | OneStepDecrypt, AesCcmOperation::OneStep(op)) =
            (msg_type, &mut *operation)
        {
            return Self::one_step(msg_type, op);
        }

        let mut segmented = lock(&self.segmented);
        match (msg_type, operation) {
            (SetupEncrypt | SetupDecrypt, AesCcmOperation::Setup(setup)) => {
                let Some(key) = aes_material(&setup.key) else {
                    return Status::INVALID_INPUTS;
                };
                let state = CcmState {
                    key,
                    decrypt: msg_type == SetupDecrypt,
                    aad_len: setup.aad_len,
                    payload_len: setup.payload_len,
                    mac_len: setup.mac_len,
                    ..CcmState::default()
                };
                segmented.insert(handle, state);
                Status::SUCCESS
            },
            (SetLengths, AesCcmOperation::Lengths(lengths)) => {
                let Some(state) = segmented.get_mut(&handle) else {
                    return Status::ERROR;
                };
                if !MAC_LENGTHS.contains(&lengths.mac_len) {
                    return Status::INVALID_INPUTS;
                }
                state.aad_len = lengths.aad_len;
                state.payload_len = lengths.payload_len;
                state.mac_len = lengths.mac_len;
                Status::SUCCESS
            },
            (SetNonce, AesCcmOperation::Nonce(nonce)) => {
                let Some(state) = segmented.get_mut(&handle) else {
                    return Status::ERROR;
                };
                if !NONCE_LENGTHS.contains(&nonce.nonce.len()) {
                    return Status::INVALID_INPUTS;
                }
                state.nonce = Some(nonce.nonce.clone());
                Status::SUCCESS
            },
            (AddAad, AesCcmOperation::Aad(segment)) => {
                let Some(state) = segmented.get_mut(&handle) else {
                    return Status::ERROR;
                };
                if state.nonce.is_none() || !state.plaintext.is_empty() {
                    return Status::ERROR;
                }
                state.aad.extend_from_slice(&segment.aad);
                if state.lengths_fit() { Status::SUCCESS } else { Status::INVALID_INPUTS }
            },
            (AddData, AesCcmOperation::Segment(segment)) => {
                let Some(state) = segmented.get_mut(&handle) else {
                    return Status::ERROR;
                };
                let Some(nonce) = state.nonce.clone() else {
                    return Status::ERROR;
                };
                segment.output = state.apply(&nonce, &segment.input);
                if state.lengths_fit() { Status::SUCCESS } else { Status::INVALID_INPUTS }
            },
            (FinalizeEncrypt | FinalizeDecrypt, AesCcmOperation::Finalize(last)) => {
                let Some(mut state) = segmented.remove(&handle) else {
                    return Status::ERROR;
                };
                let Some(nonce) = state.nonce.clone() else {
                    return Status::ERROR;
                };
                if state.decrypt != (msg_type == FinalizeDecrypt) {
                    return Status::ERROR;
                }
                last.output = state.apply(&nonce, &last.input);
                if state.aad.len() != state.aad_len
                    || state.plaintext.len() != state.payload_len
                    || !MAC_LENGTHS.contains(&state.mac_len)
                {
                    return Status::INVALID_INPUTS;
                }

                let tag = ccm_tag(&state.key, &nonce, &state.aad, &state.plaintext, state.mac_len);
                if state.decrypt {
                    if tag != last.mac {
                        last.output.clear();
                        return STATUS_MAC_INVALID;
                    }
                } else {
                    last.mac = tag;
                }
                Status::SUCCESS
            },
            _ => Status::INVALID_INPUTS,
        }
    }

    fn reset(&self, handle: HandleId) {
        lock(&self.segmented).remove(&handle);
    }

    fn close(&self, handle: HandleId) {
        lock(&self.segmented).remove(&handle);
    }
}

#[derive(Debug, Default, Clone)]
struct HashState {
    hash_type: HashType,
    buffer: Vec<u8>,
    hmac_key: Option<Vec<u8>>,
}

/// SHA-2 engine. Segments accumulate per handle until finalize.
#[derive(Debug, Default)]
pub struct Sha2Engine {
    states: Mutex<HashMap<HandleId, HashState>>,
}

impl Executor<Sha2> for Sha2Engine {
    fn open(&self, handle: HandleId, params: &Sha2Params) {
        let state = HashState { hash_type: params.hash_type, ..HashState::default() };
        lock(&self.states).insert(handle, state);
    }

    fn execute(
        &self,
        handle: HandleId,
        msg_type: Sha2Msg,
        operation: &mut Sha2Operation,
    ) -> Status {
        let mut states = lock(&self.states);
        let state = states.entry(handle).or_default();
        let digest_len = state.hash_type.digest_len();

        match (msg_type, operation) {
            (Sha2Msg::HashData, Sha2Operation::Digest(op)) => {
                op.digest = mix(&op.data, digest_len);
            },
            (Sha2Msg::AddData, Sha2Operation::Digest(op)) => {
                state.buffer.extend_from_slice(&op.data);
            },
            (Sha2Msg::AddData, Sha2Operation::Hmac(op)) => {
                state.buffer.extend_from_slice(&op.data);
            },
            (Sha2Msg::Finalize, Sha2Operation::Digest(op)) => {
                state.buffer.extend_from_slice(&op.data);
                op.digest = mix(&state.buffer, digest_len);
                state.buffer.clear();
            },
            (Sha2Msg::SetupHmac, Sha2Operation::Hmac(op)) => {
                let Some(key) = material(&op.key) else {
                    return Status::INVALID_INPUTS;
                };
                state.hmac_key = Some(key);
                state.buffer.clear();
            },
            (Sha2Msg::FinalizeHmac, Sha2Operation::Hmac(op)) => {
                let Some(mut keyed) = state.hmac_key.take() else {
                    return Status::ERROR;
                };
                keyed.extend_from_slice(&state.buffer);
                keyed.extend_from_slice(&op.data);
                op.mac = mix(&keyed, digest_len);
                state.buffer.clear();
            },
            (Sha2Msg::Hmac, Sha2Operation::Hmac(op)) => {
                let Some(mut keyed) = material(&op.key) else {
                    return Status::INVALID_INPUTS;
                };
                keyed.extend_from_slice(&op.data);
                op.mac = mix(&keyed, digest_len);
            },
            (Sha2Msg::SetHashType, Sha2Operation::HashType(hash_type)) => {
                state.hash_type = *hash_type;
            },
            _ => return Status::INVALID_INPUTS,
        }
        Status::SUCCESS
    }

    fn reset(&self, handle: HandleId) {
        if let Some(state) = lock(&self.states).get_mut(&handle) {
            state.buffer.clear();
            state.hmac_key = None;
        }
    }

    fn close(&self, handle: HandleId) {
        lock(&self.states).remove(&handle);
    }
}

/// TRNG engine backed by a seeded ChaCha stream.
#[derive(Debug)]
pub struct TrngEngine {
    rng: Mutex<ChaCha8Rng>,
    healthy: Mutex<bool>,
}

impl TrngEngine {
    /// Engine producing the stream for `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)), healthy: Mutex::new(true) }
    }

    /// Make subsequent requests fail their health test.
    pub fn fail_health_test(&self, failing: bool) {
        *lock(&self.healthy) = !failing;
    }

    fn fill(&self, len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        lock(&self.rng).fill_bytes(&mut bytes);
        bytes
    }
}

impl Default for TrngEngine {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl Executor<Trng> for TrngEngine {
    fn execute(
        &self,
        _handle: HandleId,
        _msg_type: nsbridge_drivers::trng::TrngMsg,
        operation: &mut TrngOperation,
    ) -> Status {
        if !*lock(&self.healthy) {
            return STATUS_ENTROPY_FAILURE;
        }
        match operation {
            TrngOperation::Key(request) => {
                let len = request.key.len();
                if len == 0 {
                    return Status::INVALID_INPUTS;
                }
                request.key = CryptoKey::Plaintext(self.fill(len));
            },
            TrngOperation::Bytes(request) => request.bytes = self.fill(request.len),
        }
        Status::SUCCESS
    }
}

/// ECDH engine. Checks key lengths against the handle's curve.
#[derive(Debug, Default)]
pub struct EcdhEngine {
    curves: Mutex<HashMap<HandleId, Curve>>,
}

impl EcdhEngine {
    fn public_key(curve: Curve, private_key: &[u8]) -> Vec<u8> {
        let mut key = mix(private_key, curve.public_key_len());
        if curve != Curve::Curve25519 {
            // uncompressed point prefix
            key[0] = 0x04;
        }
        key
    }
}

impl Executor<Ecdh> for EcdhEngine {
    fn open(&self, handle: HandleId, params: &EcdhParams) {
        lock(&self.curves).insert(handle, params.curve);
    }

    fn execute(
        &self,
        handle: HandleId,
        _msg_type: nsbridge_drivers::ecdh::EcdhMsg,
        operation: &mut EcdhOperation,
    ) -> Status {
        let curve = lock(&self.curves).get(&handle).copied().unwrap_or_default();
        match operation {
            EcdhOperation::PublicKey(GeneratePublicKey { private_key, public_key }) => {
                let Some(scalar) = material(private_key) else {
                    return Status::INVALID_INPUTS;
                };
                if scalar.len() != curve.scalar_len() {
                    return STATUS_PRIVATE_KEY_LARGER_THAN_ORDER;
                }
                *public_key = Self::public_key(curve, &scalar);
            },
            EcdhOperation::SharedSecret(ComputeSharedSecret {
                private_key,
                peer_public_key,
                shared_secret,
            }) => {
                let Some(mut scalar) = material(private_key) else {
                    return Status::INVALID_INPUTS;
                };
                if scalar.len() != curve.scalar_len() {
                    return STATUS_PRIVATE_KEY_LARGER_THAN_ORDER;
                }
                if peer_public_key.len() != curve.public_key_len() {
                    return STATUS_POINT_AT_INFINITY;
                }
                scalar.extend_from_slice(peer_public_key);
                *shared_secret = mix(&scalar, curve.scalar_len());
            },
        }
        Status::SUCCESS
    }

    fn close(&self, handle: HandleId) {
        lock(&self.curves).remove(&handle);
    }
}
