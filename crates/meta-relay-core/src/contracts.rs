//! Solidity bindings for the contracts the pipeline talks to.
//!
//! Only the functions the pipeline encodes, decodes or reads are declared here.

use alloy::sol;

/// Batch operation tag for "call an agreement through the host".
pub const OPERATION_TYPE_CALL_AGREEMENT: u32 = 201;

/// Operator may create flows on the owner's behalf.
pub const PERMISSION_CREATE: u8 = 1;
/// Operator may update flows on the owner's behalf.
pub const PERMISSION_UPDATE: u8 = 1 << 1;
/// Operator may delete flows on the owner's behalf.
pub const PERMISSION_DELETE: u8 = 1 << 2;
/// All permission bits.
pub const PERMISSION_FULL: u8 = PERMISSION_CREATE | PERMISSION_UPDATE | PERMISSION_DELETE;

sol! {
    /// Request signed by the caller and executed by the forwarder.
    ///
    /// The struct name and field order are part of the EIP-712 type hash.
    #[derive(Debug, PartialEq, Eq)]
    struct ERC20ForwardRequest {
        address from;
        address to;
        address token;
        uint256 txGas;
        uint256 tokenGasPrice;
        uint256 batchId;
        uint256 batchNonce;
        uint256 deadline;
        bytes data;
    }

    /// One entry of a host batch call.
    #[derive(Debug, PartialEq, Eq)]
    struct Operation {
        uint32 operationType;
        address target;
        bytes data;
    }

    interface IForwarder {
        function getNonce(address from, uint256 batchId) external view returns (uint256 nonce);
        function executePersonalSign(ERC20ForwardRequest calldata req, bytes calldata sig)
            external
            returns (bool success, bytes memory ret);
        function executeEIP712(
            ERC20ForwardRequest calldata req,
            bytes32 domainSeparator,
            bytes calldata sig
        ) external returns (bool success, bytes memory ret);
    }

    interface IDigestHelper {
        function computeDigest(ERC20ForwardRequest calldata req) external view returns (bytes32 digest);
    }

    interface IFlowAgreement {
        function updateFlowOperatorPermissions(
            address token,
            address flowOperator,
            uint8 permissions,
            int96 flowRateAllowance,
            bytes calldata ctx
        ) external returns (bytes memory newCtx);
        function revokeFlowOperatorWithFullControl(
            address token,
            address flowOperator,
            bytes calldata ctx
        ) external returns (bytes memory newCtx);
        function getFlowOperatorData(address token, address sender, address flowOperator)
            external
            view
            returns (bytes32 flowOperatorId, uint8 permissions, int96 flowRateAllowance);
    }

    interface IHost {
        function callAgreement(address agreementClass, bytes calldata callData, bytes calldata userData)
            external
            returns (bytes memory returnedData);
        function forwardBatchCall(Operation[] calldata operations) external;
    }

    interface IForwarderRecipient {
        function isTrustedForwarder(address forwarder) external view returns (bool trusted);
        function trustedForwarder() external view returns (address forwarder);
        function versionRecipient() external view returns (string memory version);
    }
}
